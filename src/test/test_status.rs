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

use pretty_assertions::assert_eq;
use sat_store::{keys, EpochFile, LinkChange, MemStore, Store, TaskResult};

use crate::scheduler::apply_epoch;
use crate::status::{NodeReport, SystemStatus};

async fn seeded_store() -> MemStore {
    let store = MemStore::new();
    store
        .put(
            &keys::worker("host-1"),
            br#"{"ip": "10.0.0.11", "sat-vnet-cidr": "172.25.1.0/24",
                 "sat-vnet-super-cidr": "172.25.0.0/16", "cpu": "8", "mem": "16GiB"}"#
                .to_vec(),
        )
        .await
        .unwrap();
    for (name, node_type) in [("sat1", "satellite"), ("sat2", "satellite"), ("grd1", "gateway")] {
        store
            .put(
                &keys::node(name),
                format!(r#"{{"type": "{node_type}", "worker": "host-1"}}"#).into_bytes(),
            )
            .await
            .unwrap();
    }
    let epoch = EpochFile {
        links_add: vec![
            LinkChange::between("sat1", "sat2"),
            LinkChange::between("sat1", "grd1"),
        ],
        ..Default::default()
    };
    apply_epoch(&store, &epoch).await.unwrap();
    store
}

#[tokio::test]
async fn status_counts_workers_nodes_and_links() {
    let store = seeded_store().await;
    let status = SystemStatus::gather(&store).await.unwrap();
    assert_eq!(status.workers.len(), 1);
    assert_eq!(status.nodes.len(), 3);
    // four half-keys, two logical links
    assert_eq!(status.num_links, 2);

    let by_type = status.nodes_by_type();
    assert_eq!(by_type["satellite"], 2);
    assert_eq!(by_type["gateway"], 1);

    let by_worker = status.nodes_by_worker();
    assert_eq!(by_worker["host-1"], 3);
}

#[tokio::test]
async fn node_report_lists_links_and_task_result() {
    let store = seeded_store().await;
    store
        .put(&keys::etchost("sat1"), b"10.100.0.1".to_vec())
        .await
        .unwrap();
    store
        .put(
            &keys::state_run("sat1"),
            serde_json::to_vec(&TaskResult {
                exit_code: 0,
                ran_at_revision: 9,
            })
            .unwrap(),
        )
        .await
        .unwrap();

    let report = NodeReport::gather(&store, "sat1").await.unwrap();
    assert_eq!(report.spec.node_type, "satellite");
    assert_eq!(report.links.len(), 2);
    assert!(report.links.contains_key("vl_sat2_1"));
    assert!(report.links.contains_key("vl_grd1_1"));
    assert_eq!(report.overlay_addr.as_deref(), Some("10.100.0.1"));
    assert_eq!(report.last_task.as_ref().unwrap().ran_at_revision, 9);
}

#[tokio::test]
async fn unknown_node_is_an_error() {
    let store = seeded_store().await;
    assert!(NodeReport::gather(&store, "nope").await.is_err());
}
