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

//! The shared data model: every JSON value stored under `/config/*` and `/state/*`.

use std::net::Ipv4Addr;

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::units::{parse_cpu, parse_mem, QuantityError};
use crate::vni::link_vni;

/// Maximum length of a node name in bytes. Names become container hostnames and interface
/// name components (`vl_{peer}_{antenna}` must fit in IFNAMSIZ).
pub const MAX_NODE_NAME_LEN: usize = 8;

/// Specification of a worker host, stored under `/config/workers/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Management address of the worker, used as the SSH destination.
    pub ip: Ipv4Addr,
    /// SSH user for the management channel.
    #[serde(rename = "ssh-user", default = "default_ssh_user")]
    pub ssh_user: String,
    /// Path to the SSH private key used to reach the worker.
    #[serde(rename = "ssh-key", default = "default_ssh_key")]
    pub ssh_key: String,
    /// Name of the local container bridge on the worker.
    #[serde(rename = "sat-vnet", default = "default_sat_vnet")]
    pub sat_vnet: String,
    /// Worker-local container subnet. Disjoint across workers.
    #[serde(rename = "sat-vnet-cidr")]
    pub sat_vnet_cidr: Ipv4Net,
    /// Global underlay supernet covering all worker subnets.
    #[serde(rename = "sat-vnet-super-cidr")]
    pub sat_vnet_super_cidr: Ipv4Net,
    /// CPU capacity in cores (accepts `"8"` or `"8000m"`).
    #[serde(default)]
    pub cpu: String,
    /// Memory capacity (accepts `"16GiB"`, `"16Gi"`, ...).
    #[serde(default)]
    pub mem: String,
    /// Cores consumed by placed nodes. Written back by the placement controller.
    #[serde(rename = "cpu-used", default)]
    pub cpu_used: f64,
    /// GiB consumed by placed nodes. Written back by the placement controller.
    #[serde(rename = "mem-used", default)]
    pub mem_used: f64,
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_ssh_key() -> String {
    "~/.ssh/id_rsa".to_string()
}

fn default_sat_vnet() -> String {
    "sat-vnet".to_string()
}

impl WorkerSpec {
    /// CPU capacity in cores.
    pub fn cpu_capacity(&self) -> Result<f64, QuantityError> {
        parse_cpu(&self.cpu)
    }

    /// Memory capacity in GiB.
    pub fn mem_capacity(&self) -> Result<f64, QuantityError> {
        parse_mem(&self.mem)
    }
}

/// Layer-3 configuration of a node, nested inside [`NodeSpec`] as `L3-config`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct L3Config {
    /// Apply `tc netem` shaping to overlay interfaces.
    #[serde(rename = "enable-netem", default = "default_true")]
    pub enable_netem: bool,
    /// Load and drive a routing module on link events.
    #[serde(rename = "enable-routing", default)]
    pub enable_routing: bool,
    /// Identifier of the routing module (registry name or external command path).
    #[serde(rename = "routing-module", default, skip_serializing_if = "Option::is_none")]
    pub routing_module: Option<String>,
    /// Opaque metadata handed to the routing module.
    #[serde(rename = "routing-metadata", default, skip_serializing_if = "serde_json::Value::is_null")]
    pub routing_metadata: serde_json::Value,
    /// Assign overlay addresses automatically from the super-cidr rules.
    #[serde(rename = "auto-assign-ips", default)]
    pub auto_assign_ips: bool,
    /// Address assignment rules, applied in input order (`any` rules last).
    #[serde(rename = "auto-assign-super-cidr", default, skip_serializing_if = "Vec::is_empty")]
    pub auto_assign_super_cidr: Vec<AutoAssignRule>,
    /// Overlay IPv4 subnet of the node (a /30), explicit or assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<Ipv4Net>,
    /// Overlay IPv6 subnet of the node (a /126), explicit or assigned.
    #[serde(rename = "cidr-v6", default, skip_serializing_if = "Option::is_none")]
    pub cidr_v6: Option<Ipv6Net>,
}

fn default_true() -> bool {
    true
}

/// One overlay address assignment rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAssignRule {
    /// Node type this rule applies to (`satellite`, `gateway`, `user`, or `any`).
    #[serde(rename = "match-type")]
    pub match_type: String,
    /// IPv4 pool the /30 subnets are drawn from.
    #[serde(rename = "super-cidr", default, skip_serializing_if = "Option::is_none")]
    pub super_cidr: Option<Ipv4Net>,
    /// IPv6 pool the /126 subnets are drawn from.
    #[serde(rename = "super-cidr6", default, skip_serializing_if = "Option::is_none")]
    pub super_cidr6: Option<Ipv6Net>,
}

impl AutoAssignRule {
    /// Whether this rule is the catch-all fallback.
    pub fn is_catch_all(&self) -> bool {
        self.match_type == "any"
    }

    /// Whether this rule applies to a node of the given type.
    pub fn matches(&self, node_type: &str) -> bool {
        self.is_catch_all() || self.match_type == node_type
    }
}

/// Specification of an emulated node, stored under `/config/nodes/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Free-form node type tag; placement rules key on `satellite`, `gateway` and `user`.
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Number of antennas, i.e. local bridges `br1..brN`.
    #[serde(rename = "n_antennas", default = "default_antennas")]
    pub n_antennas: u32,
    /// Opaque operator metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// Container image of the node.
    #[serde(default = "default_image")]
    pub image: String,
    /// Sidecar images started alongside the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<String>,
    /// Requested CPU (cores or millicores).
    #[serde(rename = "cpu-request", default)]
    pub cpu_request: String,
    /// Requested memory (binary units).
    #[serde(rename = "mem-request", default)]
    pub mem_request: String,
    /// CPU limit applied to the container.
    #[serde(rename = "cpu-limit", default, skip_serializing_if = "String::is_empty")]
    pub cpu_limit: String,
    /// Memory limit applied to the container.
    #[serde(rename = "mem-limit", default, skip_serializing_if = "String::is_empty")]
    pub mem_limit: String,
    /// Layer-3 configuration.
    #[serde(rename = "L3-config", default)]
    pub l3: L3Config,
    /// Worker the node is placed on. Filled by the placement controller if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Underlay address of the container inside the worker bridge. Written back by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth0_ip: Option<Ipv4Addr>,
}

fn default_antennas() -> u32 {
    1
}

fn default_image() -> String {
    "constellation/sat-container:latest".to_string()
}

impl NodeSpec {
    /// Requested CPU in cores.
    pub fn cpu_request(&self) -> Result<f64, QuantityError> {
        parse_cpu(&self.cpu_request)
    }

    /// Requested memory in GiB.
    pub fn mem_request(&self) -> Result<f64, QuantityError> {
        parse_mem(&self.mem_request)
    }

    /// The primary overlay address: the first usable host of the node /30, assigned to `br1`.
    pub fn primary_overlay_addr(&self) -> Option<Ipv4Addr> {
        self.l3.cidr.map(|net| net.hosts().next().unwrap_or(net.addr()))
    }
}

/// Traffic shaping parameters of a link, applied with `tc netem`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Shaping {
    /// Rate limit, e.g. `"100mbit"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// Loss probability, e.g. `"0.1%"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<String>,
    /// One-way delay, e.g. `"25ms"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    /// Queue limit in packets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Shaping {
    /// Whether any shaping parameter is set.
    pub fn is_empty(&self) -> bool {
        self.rate.is_none() && self.loss.is_none() && self.delay.is_none() && self.limit.is_none()
    }

    /// Merge `update` on top of `self`: fields present in the update win, absent fields keep
    /// their prior values.
    pub fn merged_with(&self, update: &Shaping) -> Shaping {
        Shaping {
            rate: update.rate.clone().or_else(|| self.rate.clone()),
            loss: update.loss.clone().or_else(|| self.loss.clone()),
            delay: update.delay.clone().or_else(|| self.delay.clone()),
            limit: update.limit.or(self.limit),
        }
    }
}

/// One half-link, stored under `/config/links/{node}/{iface}`.
///
/// A link is always written as two keys, one per endpoint, within the same epoch
/// transaction. Both halves carry identical content, in particular the same [`vni`]
/// (`LinkRecord::vni`) and shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// First endpoint. The order of the two endpoints is fixed by the epoch file.
    pub endpoint1: String,
    /// Second endpoint.
    pub endpoint2: String,
    /// Antenna index of `endpoint1` (1-based).
    pub endpoint1_antenna: u32,
    /// Antenna index of `endpoint2` (1-based).
    pub endpoint2_antenna: u32,
    /// Traffic shaping of this link.
    #[serde(flatten)]
    pub shaping: Shaping,
    /// 24-bit VXLAN identifier, derived deterministically from the endpoint tuple.
    pub vni: u32,
}

impl LinkRecord {
    /// Build the record for a link, computing the canonical VNI.
    pub fn new(
        endpoint1: impl Into<String>,
        endpoint1_antenna: u32,
        endpoint2: impl Into<String>,
        endpoint2_antenna: u32,
        shaping: Shaping,
    ) -> Self {
        let endpoint1 = endpoint1.into();
        let endpoint2 = endpoint2.into();
        let vni = link_vni(&endpoint1, endpoint1_antenna, &endpoint2, endpoint2_antenna);
        Self {
            endpoint1,
            endpoint2,
            endpoint1_antenna,
            endpoint2_antenna,
            shaping,
            vni,
        }
    }

    /// The peer of `node` on this link, with its antenna index. `None` if `node` is not an
    /// endpoint.
    pub fn peer_of(&self, node: &str) -> Option<(&str, u32)> {
        if self.endpoint1 == node {
            Some((&self.endpoint2, self.endpoint2_antenna))
        } else if self.endpoint2 == node {
            Some((&self.endpoint1, self.endpoint1_antenna))
        } else {
            None
        }
    }

    /// The local antenna index of `node` on this link.
    pub fn local_antenna_of(&self, node: &str) -> Option<u32> {
        if self.endpoint1 == node {
            Some(self.endpoint1_antenna)
        } else if self.endpoint2 == node {
            Some(self.endpoint2_antenna)
        } else {
            None
        }
    }

    /// The interface name of this link on `node`: `vl_{peer}_{peer_antenna}`.
    pub fn iface_on(&self, node: &str) -> Option<String> {
        self.peer_of(node)
            .map(|(peer, antenna)| iface_name(peer, antenna))
    }

    /// The logical identity of the link: the canonically ordered endpoint tuple. Both halves
    /// of a link share the same identity.
    pub fn identity(&self) -> (String, u32, String, u32) {
        if self.endpoint1 <= self.endpoint2 {
            (
                self.endpoint1.clone(),
                self.endpoint1_antenna,
                self.endpoint2.clone(),
                self.endpoint2_antenna,
            )
        } else {
            (
                self.endpoint2.clone(),
                self.endpoint2_antenna,
                self.endpoint1.clone(),
                self.endpoint1_antenna,
            )
        }
    }

    /// Whether two records describe the same tunnel (same identity and vni). Records that
    /// differ only in shaping are structurally equal: the interface is kept and only the
    /// qdisc is replaced.
    pub fn same_tunnel(&self, other: &LinkRecord) -> bool {
        self.vni == other.vni && self.identity() == other.identity()
    }
}

/// Interface name of a half-link towards `peer` on its `antenna`.
pub fn iface_name(peer: &str, antenna: u32) -> String {
    format!("vl_{peer}_{antenna}")
}

/// The epoch directory and file pattern, stored under `/config/epoch-config`. Informational
/// for human operators and used as a default by `run` and `oracle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Directory holding the epoch files.
    #[serde(rename = "epoch-dir")]
    pub epoch_dir: String,
    /// Glob-like pattern of the epoch file names.
    #[serde(rename = "file-pattern")]
    pub file_pattern: String,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            epoch_dir: "constellation-epochs".to_string(),
            file_pattern: "constellation-epoch*.json".to_string(),
        }
    }
}

/// Result of the last executed task batch, stored under `/state/run/{node}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Exit code of the task shell.
    #[serde(rename = "exit-code")]
    pub exit_code: i32,
    /// Store revision of the task list that was executed.
    #[serde(rename = "ran-at-revision")]
    pub ran_at_revision: i64,
}

/// Validate a node name: non-empty and at most [`MAX_NODE_NAME_LEN`] bytes.
pub fn validate_node_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("node name must not be empty".to_string());
    }
    if name.len() > MAX_NODE_NAME_LEN {
        return Err(format!(
            "node name {name:?} is {} bytes long (max {MAX_NODE_NAME_LEN})",
            name.len()
        ));
    }
    Ok(())
}
