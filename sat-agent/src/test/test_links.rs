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

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sat_store::{keys, LinkRecord, MemStore, Shaping, Store, WatchEvent};

use crate::kernel::mock::MockKernel;
use crate::links::LinkManager;
use crate::routing::{RoutingModule, RoutingOutcome};

/// Records every callback, so tests can assert the drain-before-break ordering.
#[derive(Debug, Default)]
struct RecordingRouting {
    calls: Mutex<Vec<String>>,
}

impl RecordingRouting {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoutingModule for RecordingRouting {
    fn name(&self) -> &str {
        "recording"
    }

    async fn init(&self, _store: &dyn Store, _node: &str) -> RoutingOutcome {
        self.calls.lock().unwrap().push("init".to_string());
        RoutingOutcome::ok("")
    }

    async fn link_add(&self, _store: &dyn Store, _node: &str, iface: &str) -> RoutingOutcome {
        self.calls.lock().unwrap().push(format!("add {iface}"));
        RoutingOutcome::ok("")
    }

    async fn link_del(&self, _store: &dyn Store, _node: &str, iface: &str) -> RoutingOutcome {
        self.calls.lock().unwrap().push(format!("del {iface}"));
        RoutingOutcome::ok("")
    }
}

async fn store_with_peers() -> MemStore {
    let store = MemStore::new();
    for (name, addr) in [("sat1", "10.0.0.2"), ("sat2", "10.0.0.3"), ("sat3", "10.0.0.4")] {
        store
            .put(
                &keys::node(name),
                format!(r#"{{"type": "satellite", "eth0_ip": "{addr}"}}"#).into_bytes(),
            )
            .await
            .unwrap();
    }
    store
}

struct Fixture {
    kernel: Arc<MockKernel>,
    routing: Arc<RecordingRouting>,
    manager: LinkManager,
    store: MemStore,
}

async fn fixture() -> Fixture {
    let store = store_with_peers().await;
    let kernel = Arc::new(MockKernel::with_eth0("10.0.0.2".parse().unwrap()));
    let routing = Arc::new(RecordingRouting::default());
    let manager = LinkManager::new(
        "sat1",
        "10.0.0.2".parse().unwrap(),
        true,
        Arc::new(store.clone()),
        kernel.clone(),
        routing.clone(),
    );
    Fixture {
        kernel,
        routing,
        manager,
        store,
    }
}

fn put_event(record: &LinkRecord, revision: i64) -> WatchEvent {
    let iface = record.iface_on("sat1").unwrap();
    WatchEvent::Put {
        key: keys::link("sat1", &iface),
        value: serde_json::to_vec(record).unwrap(),
        revision,
    }
}

#[tokio::test]
async fn put_creates_the_tunnel_and_applies_shaping() {
    let mut fx = fixture().await;
    let record = LinkRecord::new(
        "sat1",
        1,
        "sat2",
        1,
        Shaping {
            delay: Some("25ms".to_string()),
            ..Default::default()
        },
    );
    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();

    let vxlans = fx.kernel.vxlans();
    assert_eq!(vxlans.len(), 1);
    let spec = &vxlans[0];
    assert_eq!(spec.iface, "vl_sat2_1");
    assert_eq!(spec.vni, record.vni);
    assert_eq!(spec.remote, "10.0.0.3".parse::<std::net::Ipv4Addr>().unwrap());
    assert_eq!(spec.local, "10.0.0.2".parse::<std::net::Ipv4Addr>().unwrap());
    assert_eq!(spec.bridge, "br1");

    let netem = fx.kernel.netem_of("vl_sat2_1").unwrap();
    assert_eq!(netem.delay.as_deref(), Some("25ms"));
    assert_eq!(fx.routing.calls(), vec!["add vl_sat2_1".to_string()]);
}

#[tokio::test]
async fn redelivered_revision_is_a_noop() {
    let mut fx = fixture().await;
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();
    let journal = fx.kernel.journal();

    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();
    assert_eq!(fx.kernel.journal(), journal);
}

#[tokio::test]
async fn shaping_only_update_keeps_the_tunnel() {
    let mut fx = fixture().await;
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();

    let shaped = LinkRecord::new(
        "sat1",
        1,
        "sat2",
        1,
        Shaping {
            rate: Some("100mbit".to_string()),
            ..Default::default()
        },
    );
    fx.manager.handle_event(put_event(&shaped, 11)).await.unwrap();

    // still exactly one create in the journal: no tunnel churn
    let creates = fx
        .kernel
        .journal()
        .into_iter()
        .filter(|op| op.starts_with("create"))
        .count();
    assert_eq!(creates, 1);
    let netem = fx.kernel.netem_of("vl_sat2_1").unwrap();
    assert_eq!(netem.rate.as_deref(), Some("100mbit"));
}

#[tokio::test]
async fn structural_change_recreates_the_tunnel() {
    let mut fx = fixture().await;
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();

    // same interface name, different local antenna: new vni, must be recreated
    let moved = LinkRecord::new("sat1", 2, "sat2", 1, Shaping::default());
    assert_eq!(moved.iface_on("sat1").unwrap(), "vl_sat2_1");
    fx.manager.handle_event(put_event(&moved, 11)).await.unwrap();

    let journal = fx.kernel.journal();
    let del_pos = journal.iter().position(|op| op == "del vl_sat2_1").unwrap();
    let create_pos = journal
        .iter()
        .rposition(|op| op.starts_with("create vl_sat2_1"))
        .unwrap();
    assert!(del_pos < create_pos);

    // routes drained before the teardown, re-announced after the new tunnel is up
    assert_eq!(
        fx.routing.calls(),
        vec![
            "add vl_sat2_1".to_string(),
            "del vl_sat2_1".to_string(),
            "add vl_sat2_1".to_string(),
        ]
    );
    assert_eq!(fx.kernel.vxlans()[0].vni, moved.vni);
    assert_eq!(fx.kernel.vxlans()[0].bridge, "br2");
}

#[tokio::test]
async fn delete_drains_routes_before_teardown() {
    let mut fx = fixture().await;
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.manager.handle_event(put_event(&record, 10)).await.unwrap();

    fx.manager
        .handle_event(WatchEvent::Delete {
            key: keys::link("sat1", "vl_sat2_1"),
            revision: 11,
        })
        .await
        .unwrap();

    assert!(fx.kernel.vxlans().is_empty());
    assert_eq!(
        fx.routing.calls(),
        vec!["add vl_sat2_1".to_string(), "del vl_sat2_1".to_string()]
    );
}

#[tokio::test]
async fn irrelevant_link_is_ignored() {
    let mut fx = fixture().await;
    let record = LinkRecord::new("sat2", 1, "sat3", 1, Shaping::default());
    fx.manager
        .handle_event(WatchEvent::Put {
            key: keys::link("sat1", "vl_sat3_1"),
            value: serde_json::to_vec(&record).unwrap(),
            revision: 10,
        })
        .await
        .unwrap();
    assert!(fx.kernel.vxlans().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_peer_address_skips_without_crashing() {
    let mut fx = fixture().await;
    // sat9 never registered an underlay address
    fx.store
        .put(&keys::node("sat9"), br#"{"type": "satellite"}"#.to_vec())
        .await
        .unwrap();
    let record = LinkRecord::new("sat1", 1, "sat9", 1, Shaping::default());
    fx.manager
        .handle_event(WatchEvent::Put {
            key: keys::link("sat1", "vl_sat9_1"),
            value: serde_json::to_vec(&record).unwrap(),
            revision: 10,
        })
        .await
        .unwrap();
    assert!(fx.kernel.vxlans().is_empty());
}

#[tokio::test]
async fn resync_converges_to_the_published_state() {
    let mut fx = fixture().await;

    // a stale interface from a previous life of the container
    let stale = LinkRecord::new("sat1", 1, "sat3", 1, Shaping::default());
    fx.manager.handle_event(put_event(&stale, 5)).await.unwrap();

    // the store only knows about the link towards sat2
    let desired = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.store
        .put(
            &keys::link("sat1", "vl_sat2_1"),
            serde_json::to_vec(&desired).unwrap(),
        )
        .await
        .unwrap();

    fx.manager.resync().await.unwrap();

    let vxlans = fx.kernel.vxlans();
    assert_eq!(vxlans.len(), 1);
    assert_eq!(vxlans[0].iface, "vl_sat2_1");
    // the stale interface was drained and removed
    assert!(fx.routing.calls().contains(&"del vl_sat3_1".to_string()));
}

#[tokio::test]
async fn resync_is_idempotent() {
    let mut fx = fixture().await;
    let desired = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    fx.store
        .put(
            &keys::link("sat1", "vl_sat2_1"),
            serde_json::to_vec(&desired).unwrap(),
        )
        .await
        .unwrap();

    fx.manager.resync().await.unwrap();
    let journal = fx.kernel.journal();
    fx.manager.resync().await.unwrap();
    // the second pass found nothing to do
    assert_eq!(fx.kernel.journal(), journal);
}
