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

//! The task runner.
//!
//! Every new revision of `/config/run/{node}` triggers one execution of the listed commands,
//! even when the content is identical to the previous one (loop mode replays the same epoch
//! and expects re-execution). Commands run sequentially in a single shell; long-running
//! commands are expected to detach themselves (`screen`, `tmux`). The exit code of the batch
//! is reported under `/state/run/{node}` and never retried.

use std::sync::Arc;

use sat_store::{keys, Store, StoreExt, TaskResult, WatchEvent};
use tokio::process::Command;

use crate::AgentError;

/// Executes published task lists and reports their exit codes.
pub struct TaskRunner {
    node: String,
    store: Arc<dyn Store>,
    last_revision: Option<i64>,
}

impl TaskRunner {
    /// Create a runner for one node.
    pub fn new(node: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            node: node.into(),
            store,
            last_revision: None,
        }
    }

    /// Process one watch event on the task-list key. A revision runs at most once, but every
    /// new revision runs even when the content is unchanged.
    pub async fn handle_event(&mut self, event: WatchEvent) -> Result<(), AgentError> {
        let WatchEvent::Put {
            value, revision, ..
        } = event
        else {
            return Ok(());
        };
        if self.last_revision.map(|last| revision <= last).unwrap_or(false) {
            return Ok(());
        }
        self.last_revision = Some(revision);
        match serde_json::from_slice::<Vec<String>>(&value) {
            Ok(commands) => {
                self.execute(&commands, revision).await?;
            }
            Err(e) => log::warn!("[{}] malformed task list: {e}", self.node),
        }
        Ok(())
    }

    /// Run the pending task list, if any (used once at startup).
    pub async fn run_pending(&mut self) -> Result<(), AgentError> {
        if let Some(kv) = self.store.get(&keys::run(&self.node)).await? {
            if self
                .last_revision
                .map(|last| kv.revision <= last)
                .unwrap_or(false)
            {
                return Ok(());
            }
            self.last_revision = Some(kv.revision);
            match serde_json::from_slice::<Vec<String>>(&kv.value) {
                Ok(commands) => {
                    self.execute(&commands, kv.revision).await?;
                }
                Err(e) => log::warn!("[{}] malformed task list: {e}", self.node),
            }
        }
        Ok(())
    }

    /// Run the commands sequentially in one shell and report the batch exit code.
    pub async fn execute(&self, commands: &[String], revision: i64) -> Result<i32, AgentError> {
        if commands.is_empty() {
            return Ok(0);
        }
        log::info!(
            "[{}] executing {} commands (revision {revision})",
            self.node,
            commands.len()
        );
        let script = commands.join(" && ");
        let exit_code = match Command::new("sh").arg("-c").arg(&script).status().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                log::error!("[{}] cannot spawn task shell: {e}", self.node);
                -1
            }
        };
        if exit_code != 0 {
            log::warn!("[{}] task batch exited with {exit_code}", self.node);
        }
        self.store
            .put_json(
                &keys::state_run(&self.node),
                &TaskResult {
                    exit_code,
                    ran_at_revision: revision,
                },
            )
            .await?;
        Ok(exit_code)
    }
}
