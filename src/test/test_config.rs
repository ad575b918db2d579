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

use crate::config::SatConfig;

#[test]
fn section_types_are_applied() {
    let config = SatConfig::parse(
        r#"{
            "workers": {},
            "satellites": { "sat1": {} },
            "gateways": { "grd1": {} },
            "users": { "usr1": {}, "usr2": { "type": "special" } }
        }"#,
    )
    .unwrap();
    let type_of = |node: &str| {
        config
            .nodes
            .iter()
            .find(|(n, _)| n == node)
            .unwrap()
            .1
            .node_type
            .clone()
    };
    assert_eq!(type_of("sat1"), "satellite");
    assert_eq!(type_of("grd1"), "gateway");
    assert_eq!(type_of("usr1"), "user");
    // an explicit tag wins over the section default
    assert_eq!(type_of("usr2"), "special");
}

#[test]
fn common_l3_defaults_merge_under_node_config() {
    let config = SatConfig::parse(
        r#"{
            "workers": {},
            "L3-config-common": {
                "enable-routing": true,
                "routing-module": "static-oracle",
                "auto-assign-ips": true
            },
            "satellites": {
                "sat1": {},
                "sat2": { "L3-config": { "routing-module": "none" } }
            }
        }"#,
    )
    .unwrap();
    let l3_of = |node: &str| {
        config
            .nodes
            .iter()
            .find(|(n, _)| n == node)
            .unwrap()
            .1
            .l3
            .clone()
    };
    let sat1 = l3_of("sat1");
    assert!(sat1.enable_routing);
    assert!(sat1.auto_assign_ips);
    assert_eq!(sat1.routing_module.as_deref(), Some("static-oracle"));

    // node-level keys win, untouched common keys still apply
    let sat2 = l3_of("sat2");
    assert_eq!(sat2.routing_module.as_deref(), Some("none"));
    assert!(sat2.enable_routing);
}

#[test]
fn nodes_are_ordered_by_section() {
    let config = SatConfig::parse(
        r#"{
            "workers": {},
            "users": { "usr1": {} },
            "satellites": { "sat2": {}, "sat1": {} },
            "gateways": { "grd1": {} }
        }"#,
    )
    .unwrap();
    let names: Vec<&str> = config.nodes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["sat1", "sat2", "grd1", "usr1"]);
}

#[test]
fn epoch_config_defaults() {
    let config = SatConfig::parse(r#"{"workers": {}}"#).unwrap();
    assert_eq!(config.epoch_config.epoch_dir, "constellation-epochs");
    assert_eq!(config.epoch_config.file_pattern, "constellation-epoch*.json");
}
