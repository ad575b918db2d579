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

//! The epoch scheduler.
//!
//! The scheduler consumes an ordered directory of epoch files, advances a virtual clock and
//! releases each file as a single atomic store transaction. Within one file the operations
//! are ordered deletes, then adds, then updates, then task-list replacements, so a re-homing
//! event (delete A-B, add A-C) never races on the consumer side.
//!
//! Release timing: with `t0` the virtual time of the first file and `wall0` the wall clock at
//! start, file `i` is released at `wall0 + (t_i - t0)` on the monotonic clock. Files whose
//! release time has already passed are released immediately with a skew warning.

mod queue;

pub use queue::run_interactive;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sat_store::{
    keys, EpochConfig, EpochFile, LinkChange, LinkRecord, NodeSpec, Store, StoreError, StoreExt,
    TxnOp,
};
use thiserror::Error;
use tokio::time::Instant;

/// Error raised by the epoch scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No epoch files match the configured pattern.
    #[error("no epoch files matching {pattern:?} in {dir}")]
    NoEpochFiles {
        /// Directory that was scanned.
        dir: PathBuf,
        /// The file pattern.
        pattern: String,
    },
    /// The emulation is not ready (nodes missing or not yet registered).
    #[error("emulation not ready: {0}")]
    Preflight(String),
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// An I/O error outside of epoch parsing.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Options of the `run` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    /// Epoch directory; defaults to the one stored under `/config/epoch-config`.
    pub epoch_dir: Option<PathBuf>,
    /// Epoch file pattern; defaults to the stored one.
    pub file_pattern: Option<String>,
    /// Ignore epoch times and release every `d` seconds instead.
    pub fixed_wait: Option<Duration>,
    /// Restart from the first file after a delay once the list is exhausted.
    pub loop_delay: Option<Duration>,
    /// Watch the queue directory instead of scanning the epoch directory.
    pub interactive: bool,
}

/// Run the scheduler until the epoch list is exhausted (or forever in loop and interactive
/// modes). Terminates cleanly when `shutdown` resolves; an in-flight transaction is allowed
/// to finish.
pub async fn run<S: Store + ?Sized>(
    store: &S,
    opts: RunOpts,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), SchedulerError> {
    preflight(store).await?;

    let (dir, pattern) = resolve_epoch_source(store, &opts).await?;

    tokio::pin!(shutdown);

    if opts.interactive {
        return queue::run_interactive(store, &dir, shutdown).await;
    }

    let files = sat_store::list_epoch_files(&dir, &pattern)?;
    if files.is_empty() {
        return Err(SchedulerError::NoEpochFiles { dir, pattern });
    }
    log::info!("starting emulation with {} epochs", files.len());

    loop {
        let mut clock = VirtualClock::new(opts.fixed_wait);
        for path in &files {
            let epoch = match EpochFile::load(path) {
                Ok(epoch) => epoch,
                Err(e) => {
                    log::warn!("skipping epoch file: {e}");
                    continue;
                }
            };
            let release = match clock.release_instant(&epoch, path) {
                Ok(instant) => instant,
                Err(e) => {
                    log::warn!("skipping epoch file: {e}");
                    continue;
                }
            };
            if let Some(target) = release {
                let now = Instant::now();
                if target > now {
                    tokio::select! {
                        _ = &mut shutdown => {
                            log::info!("shutdown requested, stopping scheduler");
                            return Ok(());
                        }
                        _ = tokio::time::sleep_until(target) => {}
                    }
                } else if now - target > Duration::from_millis(50) {
                    log::warn!(
                        "epoch {} released {}ms late",
                        path.display(),
                        (now - target).as_millis()
                    );
                }
            }
            log::info!("applying epoch {}", path.display());
            apply_epoch(store, &epoch).await?;
        }

        match opts.loop_delay {
            Some(delay) => {
                log::info!("epoch list exhausted, looping after {}s", delay.as_secs());
                tokio::select! {
                    _ = &mut shutdown => {
                        log::info!("shutdown requested, stopping scheduler");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => return Ok(()),
        }
    }
}

/// The virtual clock: maps epoch times onto the monotonic clock.
struct VirtualClock {
    fixed_wait: Option<Duration>,
    baseline: Option<(f64, Instant)>,
}

impl VirtualClock {
    fn new(fixed_wait: Option<Duration>) -> Self {
        Self {
            fixed_wait,
            baseline: None,
        }
    }

    /// The instant at which the given epoch must be released, or `None` for "immediately".
    fn release_instant(
        &mut self,
        epoch: &EpochFile,
        path: &Path,
    ) -> Result<Option<Instant>, sat_store::EpochParseError> {
        if let Some(wait) = self.fixed_wait {
            return Ok(Some(Instant::now() + wait));
        }
        // the explicit virtual-seconds field wins over the ISO time
        let virtual_time = match epoch.epoch_time {
            Some(seconds) => Some(seconds),
            None => epoch
                .parsed_time(path)?
                .map(|t| t.unix_timestamp() as f64),
        };
        let Some(t) = virtual_time else {
            return Ok(None);
        };
        match self.baseline {
            None => {
                self.baseline = Some((t, Instant::now()));
                Ok(None)
            }
            Some((t0, wall0)) => {
                let offset = t - t0;
                if offset <= 0.0 {
                    Ok(Some(wall0))
                } else {
                    Ok(Some(wall0 + Duration::from_secs_f64(offset)))
                }
            }
        }
    }
}

/// Refuse to run before `init` and the agents registered their underlay addresses.
async fn preflight<S: Store + ?Sized>(store: &S) -> Result<(), SchedulerError> {
    let nodes: Vec<(String, NodeSpec)> = store.get_prefix_json(keys::NODES).await?;
    if nodes.is_empty() {
        return Err(SchedulerError::Preflight(
            "no nodes found under /config/nodes/".to_string(),
        ));
    }
    for (name, spec) in &nodes {
        if spec.eth0_ip.is_none() {
            return Err(SchedulerError::Preflight(format!(
                "node {name} has not registered its underlay address yet"
            )));
        }
    }
    Ok(())
}

/// Resolve the epoch directory and pattern: explicit flags win, then the stored epoch
/// configuration, then the built-in defaults.
async fn resolve_epoch_source<S: Store + ?Sized>(
    store: &S,
    opts: &RunOpts,
) -> Result<(PathBuf, String), SchedulerError> {
    let stored: EpochConfig = store
        .get_json(keys::EPOCH_CONFIG)
        .await?
        .unwrap_or_default();
    let dir = opts
        .epoch_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&stored.epoch_dir));
    let pattern = opts
        .file_pattern
        .clone()
        .unwrap_or(stored.file_pattern);
    Ok((dir, pattern))
}

/// Apply one epoch file as a single transaction: deletes, then adds, then updates, then task
/// lists. Returns the number of store operations committed.
pub async fn apply_epoch<S: Store + ?Sized>(
    store: &S,
    epoch: &EpochFile,
) -> Result<usize, StoreError> {
    let mut ops: Vec<TxnOp> = Vec::new();

    if let Some(virtual_time) = epoch.epoch_time {
        ops.push(TxnOp::Put {
            key: keys::EPOCH_TIME.to_string(),
            value: virtual_time.to_string().into_bytes(),
        });
    }

    // deleting a link that was never created is a no-op, and re-applying an epoch must not
    // touch link keys that already carry the right value
    let mut deleted: HashSet<String> = HashSet::new();
    for change in &epoch.links_del {
        for key in half_link_keys(change) {
            if store.get(&key).await?.is_some() {
                deleted.insert(key.clone());
                ops.push(TxnOp::delete(key));
            }
        }
    }

    for change in &epoch.links_add {
        let record = merged_record(store, change, false, &deleted).await?;
        let Some(record) = record else { continue };
        push_link_puts(store, &mut ops, change, &record, &deleted).await?;
    }

    for change in &epoch.links_update {
        let record = merged_record(store, change, true, &deleted).await?;
        let Some(record) = record else {
            log::warn!(
                "link-update {} - {} ignored: link not present",
                change.endpoint1,
                change.endpoint2
            );
            continue;
        };
        push_link_puts(store, &mut ops, change, &record, &deleted).await?;
    }

    for (node, commands) in &epoch.run {
        ops.push(TxnOp::put_json(keys::run(node), commands)?);
    }

    let ops = coalesce(ops);
    let count = ops.len();
    if count > 0 {
        store.txn(ops).await?;
    }
    Ok(count)
}

/// Queue the puts of both link halves, skipping keys that already hold the same value. Keys
/// queued for deletion in this epoch are always rewritten (the pending delete is coalesced
/// away).
async fn push_link_puts<S: Store + ?Sized>(
    store: &S,
    ops: &mut Vec<TxnOp>,
    change: &LinkChange,
    record: &LinkRecord,
    deleted: &HashSet<String>,
) -> Result<(), StoreError> {
    for key in half_link_keys(change) {
        let op = TxnOp::put_json(key, record)?;
        if let TxnOp::Put { key, value } = &op {
            if !deleted.contains(key) {
                if let Some(existing) = store.get(key).await? {
                    if &existing.value == value {
                        continue;
                    }
                }
            }
        }
        ops.push(op);
    }
    Ok(())
}

/// The two store keys of a link, one per endpoint.
fn half_link_keys(change: &LinkChange) -> [String; 2] {
    let iface1 = sat_store::iface_name(&change.endpoint2, change.antenna2());
    let iface2 = sat_store::iface_name(&change.endpoint1, change.antenna1());
    [
        keys::link(&change.endpoint1, &iface1),
        keys::link(&change.endpoint2, &iface2),
    ]
}

/// Build the link record for an add or update, merging shaping with an existing record.
///
/// For updates a missing link yields `None` (logged and ignored by the caller). For adds an
/// existing link is treated as an update: the tunnel identity stays, shaping is merged.
async fn merged_record<S: Store + ?Sized>(
    store: &S,
    change: &LinkChange,
    require_existing: bool,
    deleted: &HashSet<String>,
) -> Result<Option<LinkRecord>, StoreError> {
    let [key1, _] = half_link_keys(change);
    let existing: Option<LinkRecord> = if deleted.contains(&key1) {
        None
    } else {
        store.get_json(&key1).await?
    };
    let mut record = LinkRecord::new(
        change.endpoint1.clone(),
        change.antenna1(),
        change.endpoint2.clone(),
        change.antenna2(),
        change.shaping.clone(),
    );
    match existing {
        Some(prior) if prior.same_tunnel(&record) => {
            record.shaping = prior.shaping.merged_with(&change.shaping);
            Ok(Some(record))
        }
        Some(_) => Ok(Some(record)),
        None if require_existing => Ok(None),
        None => Ok(Some(record)),
    }
}

/// Collapse multiple operations on the same key into the last one, preserving the position
/// of the surviving operation. Transactions must not touch a key twice.
fn coalesce(ops: Vec<TxnOp>) -> Vec<TxnOp> {
    let mut out: Vec<Option<TxnOp>> = Vec::with_capacity(ops.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for op in ops {
        if let Some(prev) = by_key.get(op.key()) {
            out[*prev] = None;
        }
        by_key.insert(op.key().to_string(), out.len());
        out.push(Some(op));
    }
    out.into_iter().flatten().collect()
}
