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

//! Interactive (digital-twin) mode: consume a queue directory.
//!
//! A driver (live trajectory generator, operator, test harness) publishes epoch files into
//! `<epoch-dir>/epoch-queue` by writing `<name>.tmp` and renaming it in place, so the
//! consumer never observes a partially written file. Files are applied the instant they
//! appear, in numeric-suffix order when several arrive in one scan, and deleted afterwards.
//! A malformed file never terminates the scheduler: the error is written to
//! `/state/last-error` and the queue keeps draining.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use sat_store::{keys, EpochFile, Store};

use super::{apply_epoch, SchedulerError};

/// Poll period of the queue directory scan.
const POLL_PERIOD: Duration = Duration::from_millis(200);

/// Name of the queue directory inside the epoch directory.
pub const QUEUE_DIR: &str = "epoch-queue";

/// Watch the queue directory and apply files as they appear, until `shutdown` resolves.
pub async fn run_interactive<S: Store + ?Sized>(
    store: &S,
    epoch_dir: &Path,
    mut shutdown: impl Future<Output = ()> + Unpin,
) -> Result<(), SchedulerError> {
    let queue_dir = epoch_dir.join(QUEUE_DIR);
    std::fs::create_dir_all(&queue_dir)?;
    log::info!("interactive mode: watching {}", queue_dir.display());

    let mut ticker = tokio::time::interval(POLL_PERIOD);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("shutdown requested, stopping interactive scheduler");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }
        for path in sat_store::list_epoch_files(&queue_dir, "*")? {
            if path.extension().map(|e| e == "tmp").unwrap_or(false) {
                continue;
            }
            if let Err(e) = consume_one(store, &path).await {
                // store failures are fatal even here: nothing can be applied any more
                return Err(e);
            }
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("cannot delete processed file {}: {e}", path.display());
            }
        }
    }
}

/// Parse and apply one injected file. Parse failures are recorded under `/state/last-error`
/// and swallowed.
async fn consume_one<S: Store + ?Sized>(store: &S, path: &Path) -> Result<(), SchedulerError> {
    let parsed = EpochFile::load(path).and_then(|epoch| {
        // reject files with an unparseable release time before touching the store
        epoch.parsed_time(path).map(|_| epoch)
    });
    match parsed {
        Ok(epoch) => {
            log::info!("applying injected epoch {}", path.display());
            apply_epoch(store, &epoch).await?;
        }
        Err(e) => {
            log::warn!("rejecting injected file: {e}");
            store
                .put(keys::LAST_ERROR, e.to_string().into_bytes())
                .await?;
        }
    }
    Ok(())
}
