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

//! The oracle routing precompiler.
//!
//! A pure batch transformer over epoch files: it replays the link mutations on a sparse
//! adjacency, computes hop-count shortest paths for every routed destination, and emits new
//! epoch files that inject explicit `ip route` commands. With a positive drain offset, a
//! *drain-before-break* file is emitted ahead of each epoch, migrating traffic onto the best
//! path that survives the upcoming deletions before the links actually disappear; after the
//! epoch, a *post-create* file installs the primary routes of the new topology.
//!
//! Route commands are only emitted when the (primary, secondary) next-hop pair of a
//! source/destination pair changed since the previous epoch, which makes the transform
//! idempotent on its own output.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use petgraph::algo::floyd_warshall;
use petgraph::graph::NodeIndex;
use petgraph::{Graph, Undirected};
use sat_store::{
    format_epoch_time, keys, EpochConfig, EpochFile, NodeSpec, Store, StoreError, StoreExt,
};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Error raised by the oracle precompiler.
#[derive(Debug, Error)]
pub enum OracleError {
    /// No epoch files match the configured pattern.
    #[error("no epoch files matching {pattern:?} in {dir}")]
    NoEpochFiles {
        /// Directory that was scanned.
        dir: PathBuf,
        /// The file pattern.
        pattern: String,
    },
    /// The store holds no node inventory.
    #[error("missing inventory: {0}")]
    MissingInventory(String),
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// An I/O error while reading or writing epoch files.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Options of the `oracle` subcommand.
#[derive(Debug, Clone)]
pub struct OracleOpts {
    /// Epoch directory; defaults to the stored epoch configuration.
    pub epoch_dir: Option<PathBuf>,
    /// Epoch file pattern; defaults to the stored one.
    pub file_pattern: Option<String>,
    /// Output directory for the generated files.
    pub out_dir: PathBuf,
    /// Node type whose nodes become routing destinations (`all` for every node).
    pub node_type_to_route: String,
    /// Drain-before-break offset; zero disables the drain files.
    pub drain_offset: Duration,
    /// Offset of the post-create route file after each epoch.
    pub creation_offset: Duration,
}

/// The node inventory the precompiler routes over, read from the store once at startup.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Node name to type tag.
    pub node_types: BTreeMap<String, String>,
    /// Node name to primary overlay address (the next-hop address).
    pub addrs: BTreeMap<String, Ipv4Addr>,
    /// Node name to route destination prefix (the overlay /30, or the primary address).
    pub dst_nets: BTreeMap<String, String>,
}

impl Inventory {
    /// Load the inventory from `/config/nodes/*` and `/config/etchosts/*`.
    pub async fn load<S: Store + ?Sized>(store: &S) -> Result<Self, OracleError> {
        let nodes: Vec<(String, NodeSpec)> = store.get_prefix_json(keys::NODES).await?;
        if nodes.is_empty() {
            return Err(OracleError::MissingInventory(
                "no nodes under /config/nodes/".to_string(),
            ));
        }
        let mut inventory = Inventory::default();
        for kv in store.get_prefix(keys::ETCHOSTS).await? {
            let name = keys::last_segment(&kv.key).to_string();
            if let Ok(addr) = String::from_utf8_lossy(&kv.value).trim().parse() {
                inventory.addrs.insert(name, addr);
            }
        }
        for (name, spec) in nodes {
            if let Some(net) = spec.l3.cidr {
                inventory.dst_nets.insert(name.clone(), net.to_string());
            } else if let Some(addr) = spec.primary_overlay_addr().or(inventory.addrs.get(&name).copied()) {
                inventory.dst_nets.insert(name.clone(), addr.to_string());
            }
            if let Some(addr) = spec.primary_overlay_addr() {
                inventory.addrs.entry(name.clone()).or_insert(addr);
            }
            inventory.node_types.insert(name, spec.node_type);
        }
        Ok(inventory)
    }

    /// The routed destinations for a type filter.
    fn routed_nodes(&self, type_filter: &str) -> BTreeSet<String> {
        self.node_types
            .iter()
            .filter(|(_, t)| type_filter == "all" || t.as_str() == type_filter)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// Primary and secondary next hop of one source/destination pair. `primary == None` means
/// the destination is unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct NextHops {
    primary: Option<String>,
    secondary: Option<String>,
}

/// The stateful core of the precompiler: adjacency, previous next hops, offsets.
#[derive(Debug)]
pub struct Precompiler {
    inventory: Inventory,
    routed: BTreeSet<String>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    previous: HashMap<(String, String), NextHops>,
    drain_offset: Duration,
    creation_offset: Duration,
}

impl Precompiler {
    /// Create a precompiler over the given inventory.
    pub fn new(
        inventory: Inventory,
        node_type_to_route: &str,
        drain_offset: Duration,
        creation_offset: Duration,
    ) -> Self {
        let routed = inventory.routed_nodes(node_type_to_route);
        Self {
            inventory,
            routed,
            adjacency: BTreeMap::new(),
            previous: HashMap::new(),
            drain_offset,
            creation_offset,
        }
    }

    /// Process one epoch file, returning the output files in emission order: the optional
    /// drain file, the unchanged copy of the input, and the optional post-create file.
    pub fn process(&mut self, epoch: &EpochFile) -> Vec<EpochFile> {
        let mut out = Vec::new();

        // break phase: deletions take effect, traffic drains onto surviving paths
        for change in &epoch.links_del {
            self.remove_edge(&change.endpoint1, &change.endpoint2);
        }
        if self.drain_offset > Duration::ZERO {
            let drain_routes = self.route_changes();
            if !drain_routes.is_empty() {
                out.push(route_file(
                    shifted_time(epoch, -(self.drain_offset.as_millis() as i64)),
                    drain_routes,
                ));
            }
        }

        // make phase: additions take effect, primaries move onto the new links. Updates feed
        // the adjacency too: with no store to consult, an updated link may be one this
        // transformer never saw added.
        for change in epoch.links_add.iter().chain(&epoch.links_update) {
            self.add_edge(&change.endpoint1, &change.endpoint2);
        }
        let primary_routes = self.route_changes();

        out.push(epoch.clone());
        if !primary_routes.is_empty() {
            out.push(route_file(
                shifted_time(epoch, self.creation_offset.as_millis() as i64),
                primary_routes,
            ));
        }
        out
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.adjacency
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.adjacency
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    fn remove_edge(&mut self, a: &str, b: &str) {
        if let Some(peers) = self.adjacency.get_mut(a) {
            peers.remove(b);
        }
        if let Some(peers) = self.adjacency.get_mut(b) {
            peers.remove(a);
        }
    }

    /// Compute next hops on the current adjacency and emit route commands for every
    /// source/destination pair whose next hops changed.
    fn route_changes(&mut self) -> BTreeMap<String, Vec<String>> {
        let (indices, dist) = self.all_pairs_distances();
        let mut commands: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let sources: Vec<&String> = self.inventory.node_types.keys().collect();
        for src in &sources {
            for dst in &self.routed {
                if src.as_str() == dst {
                    continue;
                }
                let hops = self.next_hops(src, dst, &indices, &dist);
                let key = (src.to_string(), dst.clone());
                // a pair that was never reachable stays silent until a path appears
                let prior = self.previous.get(&key).cloned().unwrap_or_default();
                if prior == hops {
                    continue;
                }
                if let Some(cmds) = self.commands_for(dst, &hops) {
                    commands.entry(src.to_string()).or_default().extend(cmds);
                }
                self.previous.insert(key, hops);
            }
        }

        // small settle delay ahead of the route updates of each node
        for cmds in commands.values_mut() {
            cmds.insert(0, "sleep 0.1".to_string());
        }
        commands
    }

    /// All-pairs hop counts over the current adjacency. Unreachable pairs carry `u32::MAX`.
    fn all_pairs_distances(
        &self,
    ) -> (
        BTreeMap<String, NodeIndex>,
        HashMap<(NodeIndex, NodeIndex), u32>,
    ) {
        let mut graph: Graph<(), (), Undirected> = Graph::new_undirected();
        let mut indices = BTreeMap::new();
        for name in self.inventory.node_types.keys() {
            indices.insert(name.clone(), graph.add_node(()));
        }
        for (a, peers) in &self.adjacency {
            for b in peers {
                if a < b {
                    if let (Some(&ia), Some(&ib)) = (indices.get(a), indices.get(b)) {
                        graph.add_edge(ia, ib, ());
                    }
                }
            }
        }
        let dist = floyd_warshall(&graph, |_| 1u32).unwrap_or_default();
        (indices, dist)
    }

    /// Pick the primary and secondary next hop from `src` towards `dst`.
    ///
    /// The primary minimizes `1 + dist(neighbor, dst)`, ties broken by neighbor name. The
    /// secondary is the best candidate whose first hop differs from the primary.
    fn next_hops(
        &self,
        src: &str,
        dst: &str,
        indices: &BTreeMap<String, NodeIndex>,
        dist: &HashMap<(NodeIndex, NodeIndex), u32>,
    ) -> NextHops {
        let Some(&dst_idx) = indices.get(dst) else {
            return NextHops::default();
        };
        let mut candidates: Vec<(u32, &String)> = Vec::new();
        for neighbor in self.adjacency.get(src).into_iter().flatten() {
            let Some(&n_idx) = indices.get(neighbor) else {
                continue;
            };
            let d = dist.get(&(n_idx, dst_idx)).copied().unwrap_or(u32::MAX);
            if d == u32::MAX {
                continue;
            }
            candidates.push((d.saturating_add(1), neighbor));
        }
        candidates.sort();
        let primary = candidates.first().map(|(_, n)| (*n).clone());
        let secondary = primary.as_ref().and_then(|p| {
            candidates
                .iter()
                .map(|(_, n)| *n)
                .find(|n| *n != p)
                .cloned()
        });
        NextHops { primary, secondary }
    }

    /// Render the route commands for one destination. An unreachable destination becomes a
    /// route deletion, so queues of soon-to-vanish interfaces drain instead of blackholing.
    fn commands_for(&self, dst: &str, hops: &NextHops) -> Option<Vec<String>> {
        let dst_net = self.inventory.dst_nets.get(dst)?;
        let Some(primary) = &hops.primary else {
            return Some(vec![format!("ip route del {dst_net}")]);
        };
        let mut cmds = Vec::with_capacity(2);
        cmds.push(self.route_cmd(dst_net, primary, 100)?);
        if let Some(secondary) = &hops.secondary {
            if let Some(cmd) = self.route_cmd(dst_net, secondary, 200) {
                cmds.push(cmd);
            }
        }
        Some(cmds)
    }

    fn route_cmd(&self, dst_net: &str, next_hop: &str, metric: u32) -> Option<String> {
        let nh_addr = self.inventory.addrs.get(next_hop)?;
        let dev = sat_store::iface_name(next_hop, 1);
        Some(format!(
            "ip route replace {dst_net} via {nh_addr} dev {dev} metric {metric} onlink"
        ))
    }
}

/// A generated epoch file carrying only route commands.
fn route_file(time: Option<String>, run: BTreeMap<String, Vec<String>>) -> EpochFile {
    EpochFile {
        time,
        run,
        ..Default::default()
    }
}

/// Shift the epoch time by a signed number of milliseconds.
fn shifted_time(epoch: &EpochFile, offset_ms: i64) -> Option<String> {
    let raw = epoch.time.as_deref()?;
    let parsed = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    let shifted = parsed + time::Duration::milliseconds(offset_ms);
    Some(format_epoch_time(shifted))
}

/// Merge output files that collide on the same timestamp: link mutations are concatenated
/// and run sections are appended with duplicate commands skipped.
pub fn merge_colliding(outputs: Vec<EpochFile>) -> Vec<EpochFile> {
    let mut merged: Vec<EpochFile> = Vec::new();
    for file in outputs {
        if let Some(existing) = merged.iter_mut().find(|e| e.time == file.time) {
            existing.links_add.extend(file.links_add);
            existing.links_update.extend(file.links_update);
            existing.links_del.extend(file.links_del);
            for (node, cmds) in file.run {
                let target = existing.run.entry(node).or_default();
                for cmd in cmds {
                    if !target.contains(&cmd) {
                        target.push(cmd);
                    }
                }
            }
        } else {
            merged.push(file);
        }
    }
    merged
}

/// Run the full `oracle` subcommand: load the inventory, transform every epoch file and
/// write the numbered output files.
pub async fn run_oracle<S: Store + ?Sized>(
    store: &S,
    opts: OracleOpts,
) -> Result<(), OracleError> {
    let stored: EpochConfig = store
        .get_json(keys::EPOCH_CONFIG)
        .await?
        .unwrap_or_default();
    let dir = opts
        .epoch_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&stored.epoch_dir));
    let pattern = opts.file_pattern.clone().unwrap_or(stored.file_pattern);

    let files = sat_store::list_epoch_files(&dir, &pattern)?;
    if files.is_empty() {
        return Err(OracleError::NoEpochFiles { dir, pattern });
    }

    let inventory = Inventory::load(store).await?;
    let mut precompiler = Precompiler::new(
        inventory,
        &opts.node_type_to_route,
        opts.drain_offset,
        opts.creation_offset,
    );

    let mut outputs = Vec::new();
    for (i, path) in files.iter().enumerate() {
        let epoch = match EpochFile::load(path) {
            Ok(epoch) => epoch,
            Err(e) => {
                log::warn!("skipping epoch file: {e}");
                continue;
            }
        };
        outputs.extend(precompiler.process(&epoch));
        if (i + 1) % 10 == 0 {
            log::info!("processed {}/{} epochs", i + 1, files.len());
        }
    }

    let outputs = merge_colliding(outputs);
    std::fs::create_dir_all(&opts.out_dir)?;
    for (counter, file) in outputs.iter().enumerate() {
        let name = sat_store::epoch::numbered_file_name(&pattern, counter);
        file.store(opts.out_dir.join(&name))?;
    }
    log::info!(
        "wrote {} epoch files with routes to {}",
        outputs.len(),
        opts.out_dir.display()
    );
    Ok(())
}
