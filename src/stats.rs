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

//! Streaming statistics over an epoch sequence, plus the current worker usage.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use sat_store::{keys, EpochConfig, EpochFile, Store, StoreExt, WorkerSpec};

use crate::scheduler::SchedulerError;

/// Aggregate statistics of one epoch stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochStats {
    /// Number of epoch files processed.
    pub num_epochs: usize,
    /// Number of distinct nodes referenced by link mutations.
    pub num_nodes: usize,
    /// Mean number of active links per epoch.
    pub avg_links_per_epoch: f64,
    /// Mean node degree per epoch.
    pub avg_degree: f64,
    /// Mean link churn (adds plus deletes) per epoch.
    pub avg_churn: f64,
    /// Closed link lifetimes in virtual seconds: (count, min, avg, max).
    pub link_durations: Option<(usize, f64, f64, f64)>,
}

/// Stream a sequence of epoch files and aggregate the statistics.
pub fn compute_epoch_stats<'a>(epochs: impl IntoIterator<Item = &'a EpochFile>) -> EpochStats {
    let mut nodes: BTreeSet<String> = BTreeSet::new();
    let mut active: HashMap<(String, String), Option<f64>> = HashMap::new();
    let mut durations: Vec<f64> = Vec::new();
    let mut num_epochs = 0usize;
    let mut sum_links = 0usize;
    let mut sum_churn = 0usize;

    for epoch in epochs {
        num_epochs += 1;
        let now = virtual_seconds(epoch);

        for change in &epoch.links_del {
            let key = edge_key(&change.endpoint1, &change.endpoint2);
            if let Some(birth) = active.remove(&key).flatten() {
                if let Some(now) = now {
                    durations.push((now - birth).max(0.0));
                }
            }
            sum_churn += 1;
        }
        for change in &epoch.links_add {
            nodes.insert(change.endpoint1.clone());
            nodes.insert(change.endpoint2.clone());
            active
                .entry(edge_key(&change.endpoint1, &change.endpoint2))
                .or_insert(now);
            sum_churn += 1;
        }
        sum_links += active.len();
    }

    let num_nodes = nodes.len();
    let avg_links = if num_epochs > 0 {
        sum_links as f64 / num_epochs as f64
    } else {
        0.0
    };
    EpochStats {
        num_epochs,
        num_nodes,
        avg_links_per_epoch: avg_links,
        avg_degree: if num_nodes > 0 {
            2.0 * avg_links / num_nodes as f64
        } else {
            0.0
        },
        avg_churn: if num_epochs > 0 {
            sum_churn as f64 / num_epochs as f64
        } else {
            0.0
        },
        link_durations: if durations.is_empty() {
            None
        } else {
            let min = durations.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = durations.iter().cloned().fold(0.0, f64::max);
            let avg = durations.iter().sum::<f64>() / durations.len() as f64;
            Some((durations.len(), min, avg, max))
        },
    }
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn virtual_seconds(epoch: &EpochFile) -> Option<f64> {
    epoch.epoch_time.or_else(|| {
        epoch
            .parsed_time(std::path::Path::new(""))
            .ok()
            .flatten()
            .map(|t| t.unix_timestamp() as f64)
    })
}

/// Run the `stats` subcommand: epoch stream statistics and current worker usage.
pub async fn run_stats<S: Store + ?Sized>(
    store: &S,
    epoch_dir: Option<PathBuf>,
    file_pattern: Option<String>,
) -> Result<(), SchedulerError> {
    let stored: EpochConfig = store
        .get_json(keys::EPOCH_CONFIG)
        .await?
        .unwrap_or_default();
    let dir = epoch_dir.unwrap_or_else(|| PathBuf::from(&stored.epoch_dir));
    let pattern = file_pattern.unwrap_or(stored.file_pattern);

    let files = sat_store::list_epoch_files(&dir, &pattern)?;
    let epochs: Vec<EpochFile> = files
        .iter()
        .filter_map(|path| match EpochFile::load(path) {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                log::warn!("skipping epoch file: {e}");
                None
            }
        })
        .collect();
    let stats = compute_epoch_stats(&epochs);

    println!("Epoch stream ({}):", dir.join(&pattern).display());
    println!("  epochs:           {}", stats.num_epochs);
    println!("  nodes:            {}", stats.num_nodes);
    println!("  links per epoch:  {:.2}", stats.avg_links_per_epoch);
    println!("  average degree:   {:.2}", stats.avg_degree);
    println!("  churn per epoch:  {:.2}", stats.avg_churn);
    if let Some((count, min, avg, max)) = stats.link_durations {
        println!(
            "  link lifetimes:   {count} closed, min {min:.1}s avg {avg:.1}s max {max:.1}s"
        );
    }

    let workers: Vec<(String, WorkerSpec)> = store.get_prefix_json(keys::WORKERS).await?;
    if !workers.is_empty() {
        println!("Workers:");
        for (name, spec) in workers {
            println!(
                "  {name}: cpu {:.2}/{} cores, mem {:.2}/{} GiB",
                spec.cpu_used,
                spec.cpu.as_str(),
                spec.mem_used,
                spec.mem.as_str(),
            );
        }
    }
    Ok(())
}
