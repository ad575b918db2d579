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

//! The placement and admission controller.
//!
//! Given the static configuration, this module (1) validates it, (2) schedules every node
//! onto a worker subject to the CPU and memory budgets, (3) allocates overlay subnets, and
//! (4) publishes the derived `WorkerSpec` and `NodeSpec` values to the store in a single
//! transaction. The whole pipeline is deterministic: identical input produces identical
//! assignments, so tests can assert exact placements.

mod addressing;

pub use addressing::assign_overlay_subnets;

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use sat_store::{keys, validate_node_name, NodeSpec, Store, StoreError, TxnOp, WorkerSpec};
use thiserror::Error;

use crate::config::{ConfigError, IpStack, SatConfig};

/// Error raised by the placement controller. All variants are fatal to `init`.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The static configuration was rejected.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// No worker has enough residual CPU and memory for a node.
    #[error("no worker can fit node {node} (cpu {cpu}, mem {mem} GiB)")]
    InsufficientCapacity {
        /// The node that cannot be placed.
        node: String,
        /// Requested cores.
        cpu: f64,
        /// Requested GiB.
        mem: f64,
    },
    /// An address pool ran out of subnets.
    #[error("address pool {pool} exhausted while assigning node {node}")]
    AddressPoolExhausted {
        /// The super-cidr of the exhausted rule.
        pool: String,
        /// The node that could not be assigned.
        node: String,
    },
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl From<ConfigError> for PlacementError {
    fn from(e: ConfigError) -> Self {
        PlacementError::Validation(e.to_string())
    }
}

/// The deterministic result of planning: scheduled nodes and accounted workers.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Workers with updated `cpu-used` / `mem-used` accounting.
    pub workers: BTreeMap<String, WorkerSpec>,
    /// Nodes in input order, each with `worker` and overlay subnets filled in.
    pub nodes: Vec<(String, NodeSpec)>,
}

impl Plan {
    /// The worker assigned to `node`, for test assertions.
    pub fn worker_of(&self, node: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(name, _)| name == node)
            .and_then(|(_, spec)| spec.worker.as_deref())
    }
}

/// Validate, schedule and allocate. Pure function over the configuration.
pub fn plan(config: &SatConfig, stack: IpStack) -> Result<Plan, PlacementError> {
    validate(config)?;
    let mut workers = config.workers.clone();
    let mut nodes = config.nodes.clone();
    schedule(&mut workers, &mut nodes)?;
    assign_overlay_subnets(&mut nodes, &workers, stack)?;
    Ok(Plan { workers, nodes })
}

/// Run the full `init` command: plan and publish.
pub async fn run_init<S: Store + ?Sized>(
    store: &S,
    config: &SatConfig,
    stack: IpStack,
) -> Result<Plan, PlacementError> {
    let plan = plan(config, stack)?;
    publish(store, &plan, config).await?;
    log::info!(
        "placed {} nodes on {} workers",
        plan.nodes.len(),
        plan.workers.len()
    );
    Ok(plan)
}

// ---------------------------------------------------------------------------
// validation
// ---------------------------------------------------------------------------

fn validate(config: &SatConfig) -> Result<(), PlacementError> {
    if config.workers.is_empty() {
        return Err(PlacementError::Validation("no workers defined".to_string()));
    }

    let mut seen = HashSet::new();
    for (name, spec) in &config.nodes {
        validate_node_name(name).map_err(PlacementError::Validation)?;
        if !seen.insert(name.as_str()) {
            return Err(PlacementError::Validation(format!(
                "duplicate node name {name:?}"
            )));
        }
        if let Some(worker) = &spec.worker {
            if !config.workers.contains_key(worker) {
                return Err(PlacementError::Validation(format!(
                    "node {name} references unknown worker {worker:?}"
                )));
            }
        }
        spec.cpu_request().map_err(|e| {
            PlacementError::Validation(format!("node {name}: {e}"))
        })?;
        spec.mem_request().map_err(|e| {
            PlacementError::Validation(format!("node {name}: {e}"))
        })?;
    }

    for (name, spec) in &config.workers {
        if !spec.sat_vnet_super_cidr.contains(&spec.sat_vnet_cidr) {
            return Err(PlacementError::Validation(format!(
                "worker {name}: subnet {} not contained in supernet {}",
                spec.sat_vnet_cidr, spec.sat_vnet_super_cidr
            )));
        }
        spec.cpu_capacity()
            .map_err(|e| PlacementError::Validation(format!("worker {name}: {e}")))?;
        spec.mem_capacity()
            .map_err(|e| PlacementError::Validation(format!("worker {name}: {e}")))?;
    }
    for ((n1, w1), (n2, w2)) in config.workers.iter().tuple_combinations() {
        if w1.sat_vnet_cidr.contains(&w2.sat_vnet_cidr)
            || w2.sat_vnet_cidr.contains(&w1.sat_vnet_cidr)
        {
            return Err(PlacementError::Validation(format!(
                "workers {n1} and {n2} have overlapping subnets ({} and {})",
                w1.sat_vnet_cidr, w2.sat_vnet_cidr
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// scheduling
// ---------------------------------------------------------------------------

/// Combined resource score: 1 core is worth as much as 2 GiB, the usual balance point of the
/// worker fleet.
fn score(cpu: f64, mem_gib: f64) -> f64 {
    cpu + mem_gib / 2.0
}

fn schedule(
    workers: &mut BTreeMap<String, WorkerSpec>,
    nodes: &mut [(String, NodeSpec)],
) -> Result<(), PlacementError> {
    // account resources of explicitly pinned nodes first
    for (name, spec) in nodes.iter() {
        let Some(worker_name) = &spec.worker else {
            continue;
        };
        let cpu = spec.cpu_request().unwrap_or(0.0);
        let mem = spec.mem_request().unwrap_or(0.0);
        let worker = workers.get_mut(worker_name).unwrap();
        worker.cpu_used += cpu;
        worker.mem_used += mem;
        if worker.cpu_used > worker.cpu_capacity().unwrap_or(0.0)
            || worker.mem_used > worker.mem_capacity().unwrap_or(0.0)
        {
            log::warn!("worker {worker_name} overcommitted by pinned node {name}");
        }
    }

    // largest nodes first, names break ties so the schedule is reproducible
    let mut order: Vec<usize> = (0..nodes.len())
        .filter(|i| nodes[*i].1.worker.is_none())
        .collect();
    order.sort_by(|&a, &b| {
        let sa = score(
            nodes[a].1.cpu_request().unwrap_or(0.0),
            nodes[a].1.mem_request().unwrap_or(0.0),
        );
        let sb = score(
            nodes[b].1.cpu_request().unwrap_or(0.0),
            nodes[b].1.mem_request().unwrap_or(0.0),
        );
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| nodes[a].0.cmp(&nodes[b].0))
    });

    for idx in order {
        let cpu = nodes[idx].1.cpu_request().unwrap_or(0.0);
        let mem = nodes[idx].1.mem_request().unwrap_or(0.0);

        // most residual capacity first, so equal nodes spread round-robin over equal workers
        let candidate = workers
            .iter()
            .map(|(name, w)| {
                let free_cpu = w.cpu_capacity().unwrap_or(0.0) - w.cpu_used;
                let free_mem = w.mem_capacity().unwrap_or(0.0) - w.mem_used;
                (name.clone(), free_cpu, free_mem)
            })
            .filter(|(_, free_cpu, free_mem)| *free_cpu >= cpu && *free_mem >= mem)
            .sorted_by(|(na, ca, ma), (nb, cb, mb)| {
                score(*cb, *mb)
                    .partial_cmp(&score(*ca, *ma))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| na.cmp(nb))
            })
            .next();

        let Some((worker_name, _, _)) = candidate else {
            return Err(PlacementError::InsufficientCapacity {
                node: nodes[idx].0.clone(),
                cpu,
                mem,
            });
        };

        let worker = workers.get_mut(&worker_name).unwrap();
        worker.cpu_used += cpu;
        worker.mem_used += mem;
        log::debug!(
            "scheduled {} on {worker_name} (cpu {cpu}, mem {mem} GiB)",
            nodes[idx].0
        );
        nodes[idx].1.worker = Some(worker_name);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// publication
// ---------------------------------------------------------------------------

/// Publish the plan to the store: all writes in one transaction, skipping values that are
/// already up to date. No partial state is left behind on failure.
pub async fn publish<S: Store + ?Sized>(
    store: &S,
    plan: &Plan,
    config: &SatConfig,
) -> Result<(), PlacementError> {
    let mut ops = Vec::new();
    for (name, spec) in &plan.workers {
        push_if_different(store, &mut ops, keys::worker(name), spec).await?;
    }
    for (name, spec) in &plan.nodes {
        push_if_different(store, &mut ops, keys::node(name), spec).await?;
    }
    push_if_different(
        store,
        &mut ops,
        keys::EPOCH_CONFIG.to_string(),
        &config.epoch_config,
    )
    .await?;

    if ops.is_empty() {
        log::info!("store already up to date");
        return Ok(());
    }
    log::debug!("publishing {} keys", ops.len());
    store.txn(ops).await?;
    Ok(())
}

async fn push_if_different<S: Store + ?Sized, T: serde::Serialize>(
    store: &S,
    ops: &mut Vec<TxnOp>,
    key: String,
    value: &T,
) -> Result<(), StoreError> {
    let op = TxnOp::put_json(key, value)?;
    if let TxnOp::Put { key, value } = &op {
        if let Some(existing) = store.get(key).await? {
            if &existing.value == value {
                return Ok(());
            }
        }
    }
    ops.push(op);
    Ok(())
}
