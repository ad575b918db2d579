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

//! System status and per-node inspection.
//!
//! `status` summarizes the emulation from the store: workers with their usage, node counts
//! by type, the number of logical links and the epoch configuration. In verbose mode it also
//! asks every worker which containers are actually running. `inspect` reports everything the
//! store knows about one node.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use sat_store::{keys, EpochConfig, LinkRecord, NodeSpec, Store, StoreExt, TaskResult, WorkerSpec};

use crate::worker::{docker, WorkerSession};
use crate::ControlError;

/// Snapshot of the emulation state held in the store.
#[derive(Debug, Clone, Default)]
pub struct SystemStatus {
    /// Workers with their specification.
    pub workers: BTreeMap<String, WorkerSpec>,
    /// Nodes with their specification.
    pub nodes: BTreeMap<String, NodeSpec>,
    /// Number of logical links (each link is stored as two half-keys).
    pub num_links: usize,
    /// The published epoch configuration, if any.
    pub epoch_config: Option<EpochConfig>,
}

impl SystemStatus {
    /// Collect the snapshot from the store.
    pub async fn gather<S: Store + ?Sized>(store: &S) -> Result<Self, ControlError> {
        let workers = store
            .get_prefix_json(keys::WORKERS)
            .await?
            .into_iter()
            .collect();
        let nodes = store
            .get_prefix_json(keys::NODES)
            .await?
            .into_iter()
            .collect();
        let half_links = store.get_prefix(keys::LINKS).await?.len();
        Ok(Self {
            workers,
            nodes,
            num_links: half_links / 2,
            epoch_config: store.get_json(keys::EPOCH_CONFIG).await?,
        })
    }

    /// Node counts per type tag, in type order.
    pub fn nodes_by_type(&self) -> BTreeMap<String, usize> {
        self.nodes
            .values()
            .counts_by(|spec| spec.node_type.clone())
            .into_iter()
            .collect()
    }

    /// Node counts per assigned worker.
    pub fn nodes_by_worker(&self) -> BTreeMap<String, usize> {
        self.nodes
            .values()
            .filter_map(|spec| spec.worker.clone())
            .counts()
            .into_iter()
            .collect()
    }
}

/// Ask every worker which managed containers exist, returning the set of names.
async fn running_containers(
    workers: &BTreeMap<String, WorkerSpec>,
) -> BTreeSet<String> {
    let mut running = BTreeSet::new();
    for (name, spec) in workers {
        let session = WorkerSession::new(name, spec);
        match session.execute(&docker::ps_managed_names()).await {
            Ok((stdout, _)) => {
                running.extend(stdout.lines().map(str::trim).filter(|n| !n.is_empty()).map(String::from));
            }
            Err(e) => log::warn!("[{name}] cannot list containers: {e}"),
        }
    }
    running
}

/// Run the `status` subcommand.
pub async fn run_status<S: Store + ?Sized>(store: &S, verbose: bool) -> Result<(), ControlError> {
    let status = SystemStatus::gather(store).await?;
    let running = if verbose {
        Some(running_containers(&status.workers).await)
    } else {
        None
    };

    println!("Workers: {}", status.workers.len());
    for (name, worker) in &status.workers {
        println!(
            "  {name}: cpu {:.2}/{} cores, mem {:.2}/{} GiB, nodes {}",
            worker.cpu_used,
            worker.cpu.as_str(),
            worker.mem_used,
            worker.mem.as_str(),
            status.nodes_by_worker().get(name).copied().unwrap_or(0),
        );
    }

    println!("Nodes: {}", status.nodes.len());
    for (node_type, count) in status.nodes_by_type() {
        match &running {
            Some(running) => {
                let up = status
                    .nodes
                    .iter()
                    .filter(|(name, spec)| {
                        spec.node_type == node_type && running.contains(*name)
                    })
                    .count();
                println!("  {node_type}: {count} ({up} running)");
            }
            None => println!("  {node_type}: {count}"),
        }
    }

    println!("Links: {}", status.num_links);
    if let Some(epoch) = &status.epoch_config {
        println!("Epochs: {}/{}", epoch.epoch_dir, epoch.file_pattern);
    }
    Ok(())
}

/// Everything the store knows about one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// The node specification.
    pub spec: NodeSpec,
    /// The half-links of the node, keyed by local interface name.
    pub links: BTreeMap<String, LinkRecord>,
    /// The published primary overlay address, if any.
    pub overlay_addr: Option<String>,
    /// The result of the last executed task batch, if any.
    pub last_task: Option<TaskResult>,
}

impl NodeReport {
    /// Collect the report of one node from the store.
    pub async fn gather<S: Store + ?Sized>(
        store: &S,
        node: &str,
    ) -> Result<Self, ControlError> {
        let spec: NodeSpec = store
            .get_json(&keys::node(node))
            .await?
            .ok_or_else(|| ControlError::Other(format!("unknown node {node:?}")))?;
        let links = store
            .get_prefix_json(&keys::links_of(node))
            .await?
            .into_iter()
            .collect();
        let overlay_addr = store
            .get(&keys::etchost(node))
            .await?
            .map(|kv| String::from_utf8_lossy(&kv.value).trim().to_string());
        let last_task = store.get_json(&keys::state_run(node)).await?;
        Ok(Self {
            spec,
            links,
            overlay_addr,
            last_task,
        })
    }
}

/// Run the `inspect` subcommand.
pub async fn run_inspect<S: Store + ?Sized>(
    store: &S,
    node: &str,
    verbose: bool,
) -> Result<(), ControlError> {
    let report = NodeReport::gather(store, node).await?;

    println!("Node {node}");
    println!("  type:    {}", report.spec.node_type);
    println!(
        "  worker:  {}",
        report.spec.worker.as_deref().unwrap_or("unassigned")
    );
    if let Some(cidr) = report.spec.l3.cidr {
        println!("  cidr:    {cidr}");
    }
    if let Some(cidr) = report.spec.l3.cidr_v6 {
        println!("  cidr-v6: {cidr}");
    }
    if let Some(addr) = &report.overlay_addr {
        println!("  overlay: {addr}");
    }
    if let Some(addr) = report.spec.eth0_ip {
        println!("  eth0:    {addr}");
    }
    println!("  links:   {}", report.links.len());
    for (iface, link) in &report.links {
        let peer = link.peer_of(node).map(|(p, _)| p).unwrap_or("?");
        println!(
            "    {iface}: to {peer} vni {} rate {} loss {} delay {}",
            link.vni,
            link.shaping.rate.as_deref().unwrap_or("-"),
            link.shaping.loss.as_deref().unwrap_or("-"),
            link.shaping.delay.as_deref().unwrap_or("-"),
        );
    }
    if let Some(result) = &report.last_task {
        println!(
            "  last task: exit {} at revision {}",
            result.exit_code, result.ran_at_revision
        );
    }
    if verbose {
        println!("  image:   {}", report.spec.image);
        println!(
            "  requests: cpu {} mem {}",
            report.spec.cpu_request, report.spec.mem_request
        );
        if !report.spec.cpu_limit.is_empty() || !report.spec.mem_limit.is_empty() {
            println!(
                "  limits:   cpu {} mem {}",
                report.spec.cpu_limit, report.spec.mem_limit
            );
        }
        println!(
            "  L3-config: {}",
            serde_json::to_string_pretty(&report.spec.l3).unwrap_or_default()
        );
    }
    Ok(())
}
