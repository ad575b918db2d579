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

//! The key schema of the store.
//!
//! Every key is built through one of the functions in this module, so the schema is written
//! down in exactly one place. Ownership is partitioned by prefix: the placement controller
//! owns `/config/workers/*` and `/config/nodes/*` (except the `eth0_ip` field), the epoch
//! scheduler owns `/config/links/*` and `/config/run/*`, and each node agent owns its own
//! `/config/etchosts/{node}` and `/state/*` entries.

/// Prefix under which all configuration lives.
pub const CONFIG: &str = "/config/";
/// Prefix for worker host specifications.
pub const WORKERS: &str = "/config/workers/";
/// Prefix for node specifications.
pub const NODES: &str = "/config/nodes/";
/// Prefix for link records (half-links, one key per endpoint).
pub const LINKS: &str = "/config/links/";
/// Prefix for per-node task lists.
pub const RUN: &str = "/config/run/";
/// Prefix for per-node primary overlay addresses.
pub const ETCHOSTS: &str = "/config/etchosts/";
/// Key holding the epoch directory and file pattern (informational).
pub const EPOCH_CONFIG: &str = "/config/epoch-config";
/// Key holding the virtual time of the last released epoch (informational).
pub const EPOCH_TIME: &str = "/config/epoch-time";
/// Prefix for per-node task results.
pub const STATE_RUN: &str = "/state/run/";
/// Key holding the last epoch parse error observed in interactive mode.
pub const LAST_ERROR: &str = "/state/last-error";

/// Key of a worker specification.
pub fn worker(name: &str) -> String {
    format!("{WORKERS}{name}")
}

/// Key of a node specification.
pub fn node(name: &str) -> String {
    format!("{NODES}{name}")
}

/// Prefix under which all half-links of a node live.
pub fn links_of(node: &str) -> String {
    format!("{LINKS}{node}/")
}

/// Key of a single half-link, identified by the local interface name.
pub fn link(node: &str, iface: &str) -> String {
    format!("{LINKS}{node}/{iface}")
}

/// Key of the task list of a node.
pub fn run(node: &str) -> String {
    format!("{RUN}{node}")
}

/// Key of the primary overlay address of a node.
pub fn etchost(node: &str) -> String {
    format!("{ETCHOSTS}{node}")
}

/// Key of the last task result of a node.
pub fn state_run(node: &str) -> String {
    format!("{STATE_RUN}{node}")
}

/// Extract the last path segment of a key (the node or interface name).
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
