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
use sat_store::{keys, MemStore, NodeSpec, Store, StoreExt};

use crate::config::{IpStack, SatConfig};
use crate::placement::{self, PlacementError};

fn two_worker_config(node_req: &str) -> SatConfig {
    let nodes: String = (1..=4)
        .map(|i| format!(r#""sat{i}": {{ "cpu-request": "100m", "mem-request": "200MiB" {node_req} }}"#))
        .collect::<Vec<_>>()
        .join(",");
    SatConfig::parse(&format!(
        r#"{{
            "workers": {{
                "host-1": {{
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }},
                "host-2": {{
                    "ip": "10.0.0.12",
                    "sat-vnet-cidr": "172.25.2.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }}
            }},
            "satellites": {{ {nodes} }}
        }}"#
    ))
    .unwrap()
}

#[test]
fn equal_nodes_spread_round_robin() {
    let config = two_worker_config("");
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    assert_eq!(plan.worker_of("sat1").unwrap(), "host-1");
    assert_eq!(plan.worker_of("sat2").unwrap(), "host-2");
    assert_eq!(plan.worker_of("sat3").unwrap(), "host-1");
    assert_eq!(plan.worker_of("sat4").unwrap(), "host-2");

    let host1 = &plan.workers["host-1"];
    assert!((host1.cpu_used - 0.2).abs() < 1e-9);
    assert!((host1.mem_used - 2.0 * 200.0 / 1024.0).abs() < 1e-9);
}

#[test]
fn pinned_nodes_keep_their_worker() {
    let config = two_worker_config(r#", "worker": "host-2""#);
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    for node in ["sat1", "sat2", "sat3", "sat4"] {
        assert_eq!(plan.worker_of(node).unwrap(), "host-2");
    }
}

#[test]
fn insufficient_capacity_is_deterministic() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "0", "mem": "2GiB"
                }
            },
            "satellites": {
                "sat1": { "cpu-request": "100m", "mem-request": "200MiB" }
            }
        }"#,
    )
    .unwrap();
    match placement::plan(&config, IpStack::V4) {
        Err(PlacementError::InsufficientCapacity { node, .. }) => assert_eq!(node, "sat1"),
        other => panic!("expected InsufficientCapacity, got {other:?}"),
    }
}

#[test]
fn node_name_length_boundary() {
    let ok = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }
            },
            "satellites": { "exactly8": {} }
        }"#,
    )
    .unwrap();
    assert!(placement::plan(&ok, IpStack::V4).is_ok());

    let too_long = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }
            },
            "satellites": { "ninebytes": {} }
        }"#,
    )
    .unwrap();
    assert!(matches!(
        placement::plan(&too_long, IpStack::V4),
        Err(PlacementError::Validation(_))
    ));
}

#[test]
fn duplicate_names_across_sections_rejected() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }
            },
            "satellites": { "node1": {} },
            "users": { "node1": {} }
        }"#,
    )
    .unwrap();
    assert!(matches!(
        placement::plan(&config, IpStack::V4),
        Err(PlacementError::Validation(_))
    ));
}

#[test]
fn unknown_worker_reference_rejected() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }
            },
            "satellites": { "sat1": { "worker": "host-9" } }
        }"#,
    )
    .unwrap();
    assert!(matches!(
        placement::plan(&config, IpStack::V4),
        Err(PlacementError::Validation(_))
    ));
}

#[test]
fn overlapping_worker_subnets_rejected() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                },
                "host-2": {
                    "ip": "10.0.0.12",
                    "sat-vnet-cidr": "172.25.1.128/25",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "2", "mem": "2GiB"
                }
            },
            "satellites": { "sat1": {} }
        }"#,
    )
    .unwrap();
    assert!(matches!(
        placement::plan(&config, IpStack::V4),
        Err(PlacementError::Validation(_))
    ));
}

fn addressed_config(pool: &str, nodes: usize) -> SatConfig {
    let node_list: String = (1..=nodes)
        .map(|i| format!(r#""sat{i}": {{}}"#))
        .collect::<Vec<_>>()
        .join(",");
    SatConfig::parse(&format!(
        r#"{{
            "workers": {{
                "host-1": {{
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "8", "mem": "16GiB"
                }}
            }},
            "L3-config-common": {{
                "auto-assign-ips": true,
                "auto-assign-super-cidr": [
                    {{ "match-type": "any", "super-cidr": "{pool}" }}
                ]
            }},
            "satellites": {{ {node_list} }}
        }}"#
    ))
    .unwrap()
}

#[test]
fn subnets_assigned_in_input_order() {
    let config = addressed_config("10.100.0.0/24", 3);
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    let cidrs: Vec<String> = plan
        .nodes
        .iter()
        .map(|(_, spec)| spec.l3.cidr.unwrap().to_string())
        .collect();
    assert_eq!(cidrs, ["10.100.0.0/30", "10.100.0.4/30", "10.100.0.8/30"]);
}

#[test]
fn explicit_override_is_skipped_by_the_allocator() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "8", "mem": "16GiB"
                }
            },
            "L3-config-common": {
                "auto-assign-ips": true,
                "auto-assign-super-cidr": [
                    { "match-type": "any", "super-cidr": "10.100.0.0/24" }
                ]
            },
            "satellites": {
                "sat1": {},
                "sat2": { "L3-config": { "cidr": "10.100.0.0/30" } },
                "sat3": {}
            }
        }"#,
    )
    .unwrap();
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    let cidr_of = |node: &str| {
        plan.nodes
            .iter()
            .find(|(n, _)| n == node)
            .unwrap()
            .1
            .l3
            .cidr
            .unwrap()
            .to_string()
    };
    assert_eq!(cidr_of("sat2"), "10.100.0.0/30");
    assert_eq!(cidr_of("sat1"), "10.100.0.4/30");
    assert_eq!(cidr_of("sat3"), "10.100.0.8/30");
}

#[test]
fn address_pool_exhaustion() {
    // a /29 only holds two /30 subnets
    let config = addressed_config("10.100.0.0/29", 3);
    match placement::plan(&config, IpStack::V4) {
        Err(PlacementError::AddressPoolExhausted { node, .. }) => assert_eq!(node, "sat3"),
        other => panic!("expected AddressPoolExhausted, got {other:?}"),
    }
}

#[test]
fn dual_stack_assigns_both_families() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "8", "mem": "16GiB"
                }
            },
            "L3-config-common": {
                "auto-assign-ips": true,
                "auto-assign-super-cidr": [
                    { "match-type": "any", "super-cidr": "10.100.0.0/24", "super-cidr6": "fd00:100::/64" }
                ]
            },
            "satellites": { "sat1": {}, "sat2": {} }
        }"#,
    )
    .unwrap();
    let plan = placement::plan(&config, IpStack::Dual).unwrap();
    for (_, spec) in &plan.nodes {
        assert!(spec.l3.cidr.is_some());
        let v6 = spec.l3.cidr_v6.unwrap();
        assert_eq!(v6.prefix_len(), 126);
    }
}

#[test]
fn typed_rules_run_before_catch_all() {
    let config = SatConfig::parse(
        r#"{
            "workers": {
                "host-1": {
                    "ip": "10.0.0.11",
                    "sat-vnet-cidr": "172.25.1.0/24",
                    "sat-vnet-super-cidr": "172.25.0.0/16",
                    "cpu": "8", "mem": "16GiB"
                }
            },
            "L3-config-common": {
                "auto-assign-ips": true,
                "auto-assign-super-cidr": [
                    { "match-type": "any", "super-cidr": "10.200.0.0/24" },
                    { "match-type": "user", "super-cidr": "10.100.0.0/24" }
                ]
            },
            "satellites": { "sat1": {} },
            "users": { "usr1": {} }
        }"#,
    )
    .unwrap();
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    let cidr_of = |node: &str| {
        plan.nodes
            .iter()
            .find(|(n, _)| n == node)
            .unwrap()
            .1
            .l3
            .cidr
            .unwrap()
    };
    // the user rule applies first even though it is listed after the any rule
    assert!(cidr_of("usr1").to_string().starts_with("10.100.0."));
    assert!(cidr_of("sat1").to_string().starts_with("10.200.0."));
}

#[tokio::test]
async fn publish_is_idempotent() {
    let store = MemStore::new();
    let config = two_worker_config("");
    let plan = placement::plan(&config, IpStack::V4).unwrap();
    placement::publish(&store, &plan, &config).await.unwrap();
    let revision = store.revision();

    placement::publish(&store, &plan, &config).await.unwrap();
    assert_eq!(store.revision(), revision);

    let stored: NodeSpec = store.get_json(&keys::node("sat1")).await.unwrap().unwrap();
    assert_eq!(stored.worker.as_deref(), Some("host-1"));
    assert!(store.get(keys::EPOCH_CONFIG).await.unwrap().is_some());
}
