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

//! External routing modules: one process invocation per callback.
//!
//! The agent writes a single JSON request on the child's stdin and reads a single JSON
//! response from its stdout:
//!
//! ```text
//! -> {"event": "link-add", "node": "sat1", "iface": "vl_sat2_1", "metadata": {...}}
//! <- {"message": "adjacency refreshed", "ok": true}
//! ```
//!
//! A crash, timeout or malformed response is reported as a failed outcome; it never takes
//! the agent down.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sat_store::Store;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{RoutingModule, RoutingOutcome};

/// Deadline for one callback invocation.
const CALLBACK_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct Request<'a> {
    event: &'a str,
    node: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    iface: Option<&'a str>,
    metadata: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    message: String,
    ok: bool,
}

/// A routing module implemented as an external executable.
#[derive(Debug)]
pub struct ExternalRouting {
    command: String,
    metadata: serde_json::Value,
}

impl ExternalRouting {
    /// Create a handle for the executable at `command`.
    pub fn new(command: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            metadata,
        }
    }

    async fn call(&self, event: &str, node: &str, iface: Option<&str>) -> RoutingOutcome {
        let request = Request {
            event,
            node,
            iface,
            metadata: &self.metadata,
        };
        match self.exchange(&request).await {
            Ok(response) => RoutingOutcome {
                message: response.message,
                ok: response.ok,
            },
            Err(message) => RoutingOutcome::failed(message),
        }
    }

    async fn exchange(&self, request: &Request<'_>) -> Result<Response, String> {
        let payload =
            serde_json::to_vec(request).map_err(|e| format!("cannot encode request: {e}"))?;
        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot spawn {}: {e}", self.command))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| format!("cannot write request: {e}"))?;
        }
        let output = timeout(CALLBACK_DEADLINE, child.wait_with_output())
            .await
            .map_err(|_| format!("{} timed out", self.command))?
            .map_err(|e| format!("{} failed: {e}", self.command))?;
        if !output.status.success() {
            return Err(format!(
                "{} exited with {}",
                self.command,
                output.status.code().unwrap_or(-1)
            ));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("malformed response from {}: {e}", self.command))
    }
}

#[async_trait]
impl RoutingModule for ExternalRouting {
    fn name(&self) -> &str {
        &self.command
    }

    async fn init(&self, _store: &dyn Store, node: &str) -> RoutingOutcome {
        self.call("init", node, None).await
    }

    async fn link_add(&self, _store: &dyn Store, node: &str, iface: &str) -> RoutingOutcome {
        self.call("link-add", node, Some(iface)).await
    }

    async fn link_del(&self, _store: &dyn Store, node: &str, iface: &str) -> RoutingOutcome {
        self.call("link-del", node, Some(iface)).await
    }
}
