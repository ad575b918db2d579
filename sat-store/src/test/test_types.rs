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

use crate::types::{iface_name, validate_node_name, LinkRecord, NodeSpec, Shaping, WorkerSpec};
use crate::units::{parse_cpu, parse_mem};

#[test]
fn cpu_quantities() {
    assert_eq!(parse_cpu("2").unwrap(), 2.0);
    assert_eq!(parse_cpu("100m").unwrap(), 0.1);
    assert_eq!(parse_cpu("0.5").unwrap(), 0.5);
    assert_eq!(parse_cpu("").unwrap(), 0.0);
    assert!(parse_cpu("two").is_err());
}

#[test]
fn mem_quantities() {
    assert_eq!(parse_mem("2GiB").unwrap(), 2.0);
    assert_eq!(parse_mem("2Gi").unwrap(), 2.0);
    assert_eq!(parse_mem("512MiB").unwrap(), 0.5);
    assert_eq!(parse_mem("1Ti").unwrap(), 1024.0);
    assert_eq!(parse_mem("1048576KiB").unwrap(), 1.0);
    assert_eq!(parse_mem("3").unwrap(), 3.0);
    assert_eq!(parse_mem("").unwrap(), 0.0);
    assert!(parse_mem("lots").is_err());
}

#[test]
fn node_name_boundaries() {
    assert!(validate_node_name("sat1").is_ok());
    assert!(validate_node_name("exactly8").is_ok());
    assert!(validate_node_name("ninebytes").is_err());
    assert!(validate_node_name("").is_err());
}

#[test]
fn worker_spec_roundtrip() {
    let json = r#"{
        "ip": "10.0.0.11",
        "ssh-user": "ops",
        "ssh-key": "/home/ops/.ssh/id_ed25519",
        "sat-vnet": "sat-vnet",
        "sat-vnet-cidr": "172.25.1.0/24",
        "sat-vnet-super-cidr": "172.25.0.0/16",
        "cpu": "8",
        "mem": "16GiB"
    }"#;
    let spec: WorkerSpec = serde_json::from_str(json).unwrap();
    assert_eq!(spec.ssh_user, "ops");
    assert_eq!(spec.cpu_capacity().unwrap(), 8.0);
    assert_eq!(spec.mem_capacity().unwrap(), 16.0);
    assert_eq!(spec.cpu_used, 0.0);
    let round: WorkerSpec =
        serde_json::from_slice(&serde_json::to_vec(&spec).unwrap()).unwrap();
    assert_eq!(round, spec);
}

#[test]
fn node_spec_defaults() {
    let spec: NodeSpec = serde_json::from_str(r#"{"type": "satellite"}"#).unwrap();
    assert_eq!(spec.n_antennas, 1);
    assert!(spec.l3.enable_netem);
    assert!(!spec.l3.enable_routing);
    assert!(spec.worker.is_none());
    assert!(spec.eth0_ip.is_none());
}

#[test]
fn node_primary_overlay_addr() {
    let spec: NodeSpec = serde_json::from_str(
        r#"{"type": "satellite", "L3-config": {"cidr": "10.100.0.4/30"}}"#,
    )
    .unwrap();
    assert_eq!(
        spec.primary_overlay_addr().unwrap(),
        "10.100.0.5".parse::<std::net::Ipv4Addr>().unwrap()
    );
}

#[test]
fn link_record_halves_agree() {
    let record = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    assert_eq!(record.iface_on("sat1").unwrap(), "vl_sat2_1");
    assert_eq!(record.iface_on("sat2").unwrap(), "vl_sat1_1");
    assert_eq!(record.peer_of("sat1").unwrap(), ("sat2", 1));
    assert_eq!(record.local_antenna_of("sat2").unwrap(), 1);
    assert!(record.iface_on("sat3").is_none());

    let reversed = LinkRecord::new("sat2", 1, "sat1", 1, Shaping::default());
    assert_eq!(record.vni, reversed.vni);
    assert_eq!(record.identity(), reversed.identity());
    assert!(record.same_tunnel(&reversed));
}

#[test]
fn shaping_only_change_keeps_tunnel() {
    let a = LinkRecord::new("sat1", 1, "sat2", 1, Shaping::default());
    let b = LinkRecord::new(
        "sat1",
        1,
        "sat2",
        1,
        Shaping {
            delay: Some("25ms".to_string()),
            ..Default::default()
        },
    );
    assert!(a.same_tunnel(&b));
    let c = LinkRecord::new("sat1", 2, "sat2", 1, Shaping::default());
    assert!(!a.same_tunnel(&c));
}

#[test]
fn shaping_merge_preserves_absent_fields() {
    let prior = Shaping {
        rate: Some("100mbit".to_string()),
        loss: Some("0.1%".to_string()),
        delay: Some("10ms".to_string()),
        limit: Some(1000),
    };
    let update = Shaping {
        delay: Some("25ms".to_string()),
        ..Default::default()
    };
    let merged = prior.merged_with(&update);
    assert_eq!(merged.rate.as_deref(), Some("100mbit"));
    assert_eq!(merged.loss.as_deref(), Some("0.1%"));
    assert_eq!(merged.delay.as_deref(), Some("25ms"));
    assert_eq!(merged.limit, Some(1000));
}

#[test]
fn iface_names() {
    assert_eq!(iface_name("sat2", 1), "vl_sat2_1");
    assert_eq!(iface_name("grd1", 3), "vl_grd1_3");
}
