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

//! The per-container node agent.
//!
//! One agent runs inside every emulated node. On startup it registers its underlay address,
//! creates the local antenna bridges and initializes the routing module; afterwards it
//! watches the store and enforces the published desired state on the local kernel:
//!
//! - `/config/links/{node}/` drives the set of VXLAN interfaces and their netem shaping
//!   (the [`links`] reconciler);
//! - `/config/run/{node}` drives task execution (the [`tasks`] runner);
//! - `/config/etchosts/` keeps the local `/etc/hosts` in sync (the [`hosts`] module).
//!
//! The agent is single-threaded and cooperative: all watch callbacks are serialized on one
//! event loop, so link reconciliation and task execution never interleave kernel changes.
//! Kernel operations go through the [`kernel::Kernel`] trait; the production implementation
//! shells out to `ip` and `tc`, and tests substitute a recording mock.

pub mod agent;
pub mod hosts;
pub mod kernel;
pub mod links;
pub mod routing;
pub mod tasks;

pub use agent::Agent;

use sat_store::StoreError;
use thiserror::Error;

use crate::kernel::KernelError;

#[cfg(test)]
mod test;

/// Error type of the agent. Transient store and kernel failures are retried by the event
/// loop; these errors surface only when something is fatally wrong.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A store operation failed beyond the retry budget.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// A kernel operation failed.
    #[error("{0}")]
    Kernel(#[from] KernelError),
    /// The node specification is missing from the store.
    #[error("no specification under /config/nodes/{0}")]
    MissingSpec(String),
    /// The watch stream ended unexpectedly.
    #[error("watch stream on {0} terminated")]
    WatchClosed(String),
    /// I/O error (hosts file, task shell).
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
