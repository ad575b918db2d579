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

//! Reading the static configuration document (`sat-config.json`).
//!
//! The document lists the worker hosts and the emulated nodes, split into `satellites`,
//! `gateways` and `users` sections. An optional `L3-config-common` object provides defaults
//! merged under every node's own `L3-config`; node-level keys win.

use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use sat_store::{EpochConfig, NodeSpec, WorkerSpec};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Which address families the emulation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum IpStack {
    /// IPv4 overlay addressing only.
    #[default]
    V4,
    /// IPv6 overlay addressing only.
    V6,
    /// Both IPv4 and IPv6 overlay addressing.
    Dual,
}

impl IpStack {
    /// Whether IPv4 subnets are assigned.
    pub fn v4(&self) -> bool {
        matches!(self, IpStack::V4 | IpStack::Dual)
    }

    /// Whether IPv6 subnets are assigned.
    pub fn v6(&self) -> bool {
        matches!(self, IpStack::V6 | IpStack::Dual)
    }
}

/// Error raised while loading the static configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file cannot be read.
    #[error("cannot read config {0}: {1}")]
    Io(String, std::io::Error),
    /// The document is not valid JSON or violates the schema.
    #[error("cannot parse config {0}: {1}")]
    Json(String, serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    workers: BTreeMap<String, WorkerSpec>,
    #[serde(default)]
    satellites: BTreeMap<String, Value>,
    #[serde(default)]
    gateways: BTreeMap<String, Value>,
    #[serde(default)]
    users: BTreeMap<String, Value>,
    #[serde(rename = "L3-config-common", default)]
    l3_config_common: Option<Value>,
    #[serde(rename = "epoch-config", default)]
    epoch_config: Option<EpochConfig>,
}

/// The parsed static configuration.
#[derive(Debug, Clone)]
pub struct SatConfig {
    /// Worker hosts, keyed by name.
    pub workers: BTreeMap<String, WorkerSpec>,
    /// All nodes in input order (satellites, then gateways, then users).
    pub nodes: Vec<(String, NodeSpec)>,
    /// The epoch directory and file pattern to publish.
    pub epoch_config: EpochConfig,
}

impl SatConfig {
    /// Load and parse the configuration document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(display.clone(), e))?;
        Self::parse(&content).map_err(|e| ConfigError::Json(display, e))
    }

    /// Parse the configuration from its JSON text.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawConfig = serde_json::from_str(content)?;
        let mut nodes = Vec::new();
        for (section, default_type) in [
            (&raw.satellites, "satellite"),
            (&raw.gateways, "gateway"),
            (&raw.users, "user"),
        ] {
            for (name, value) in section {
                let mut value = value.clone();
                apply_common_l3(&mut value, raw.l3_config_common.as_ref());
                let mut spec: NodeSpec = serde_json::from_value(value)?;
                if spec.node_type.is_empty() {
                    spec.node_type = default_type.to_string();
                }
                nodes.push((name.clone(), spec));
            }
        }
        Ok(Self {
            workers: raw.workers,
            nodes,
            epoch_config: raw.epoch_config.unwrap_or_default(),
        })
    }
}

/// Merge the common L3 defaults under a node's own `L3-config`. Node-level keys win.
fn apply_common_l3(node: &mut Value, common: Option<&Value>) {
    let Some(Value::Object(common)) = common else {
        return;
    };
    let Value::Object(node) = node else { return };
    let own = node
        .entry("L3-config")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Value::Object(own) = own {
        for (key, value) in common {
            own.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}
