// Constellation: emulating satellite mega-constellations as Linux containers
// Copyright (C) 2025 The Constellation Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sat_store::{keys, LinkRecord, MemStore, NodeSpec, Shaping, Store, StoreExt, TaskResult};

use crate::agent::Agent;
use crate::hosts::HostsFile;
use crate::kernel::mock::MockKernel;

async fn seeded_store() -> MemStore {
    let store = MemStore::new();
    store
        .put(
            &keys::node("sat1"),
            br#"{"type": "satellite", "n_antennas": 1,
                 "L3-config": {"cidr": "10.100.0.0/30"}}"#
                .to_vec(),
        )
        .await
        .unwrap();
    store
        .put(
            &keys::node("sat2"),
            br#"{"type": "satellite", "eth0_ip": "10.0.0.3"}"#.to_vec(),
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn bootstrap_registers_and_prepares_the_node() {
    let store = seeded_store().await;
    let kernel = Arc::new(MockKernel::with_eth0("10.0.0.2".parse().unwrap()));
    let dir = tempfile::tempdir().unwrap();
    let hosts = HostsFile::at(dir.path().join("hosts"));

    Agent::bootstrap("sat1", Arc::new(store.clone()), kernel.clone(), hosts)
        .await
        .unwrap();

    // the underlay address was written back into the node specification
    let spec: NodeSpec = store.get_json(&keys::node("sat1")).await.unwrap().unwrap();
    assert_eq!(
        spec.eth0_ip,
        Some("10.0.0.2".parse::<std::net::Ipv4Addr>().unwrap())
    );

    // one bridge per antenna, numbered from the overlay subnet
    assert_eq!(kernel.bridges(), vec!["br1".to_string()]);
    assert!(kernel
        .journal()
        .contains(&"bridge br1 10.100.0.1/32".to_string()));

    // the primary overlay address was published
    let etchost = store.get(&keys::etchost("sat1")).await.unwrap().unwrap();
    assert_eq!(etchost.value, b"10.100.0.1".to_vec());

    // the hosts file was seeded with the own entry
    let content = std::fs::read_to_string(dir.path().join("hosts")).unwrap();
    assert!(content.contains("10.100.0.1\tsat1"));
}

#[tokio::test]
async fn agent_converges_on_published_links_and_tasks() {
    let store = seeded_store().await;
    let kernel = Arc::new(MockKernel::with_eth0("10.0.0.2".parse().unwrap()));
    let dir = tempfile::tempdir().unwrap();
    let hosts = HostsFile::at(dir.path().join("hosts"));

    let agent = Agent::bootstrap("sat1", Arc::new(store.clone()), kernel.clone(), hosts)
        .await
        .unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(agent.run(async move {
        let _ = rx.await;
    }));

    // publish a link towards sat2 and a task list
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    store
        .put(
            &keys::link("sat1", "vl_sat2_1"),
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();
    store
        .put(&keys::run("sat1"), br#"["true"]"#.to_vec())
        .await
        .unwrap();

    wait_for(|| !kernel.vxlans().is_empty()).await;
    assert_eq!(kernel.vxlans()[0].iface, "vl_sat2_1");

    let mut task_done = false;
    for _ in 0..100 {
        if let Some(result) = store
            .get_json::<TaskResult>(&keys::state_run("sat1"))
            .await
            .unwrap()
        {
            assert_eq!(result.exit_code, 0);
            task_done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(task_done, "task list was never executed");

    // deleting the link converges back to an empty overlay
    store.delete(&keys::link("sat1", "vl_sat2_1")).await.unwrap();
    wait_for(|| kernel.vxlans().is_empty()).await;

    let _ = tx.send(());
    handle.await.unwrap().unwrap();
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true");
}
