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

//! Control plane of the constellation emulator.
//!
//! The emulator turns a declarative static configuration plus a time-ordered stream of epoch
//! files into a globally consistent runtime state, enforced locally inside every container by
//! a node agent (`sat-agent`) and coordinated exclusively through a replicated key-value
//! store (see `sat-store`).
//!
//! This crate implements the batch side of the system:
//!
//! - [`placement`] validates the static configuration, schedules nodes onto workers and
//!   allocates overlay addresses, then publishes the derived per-node configuration;
//! - [`deploy`] instantiates one container per node on its assigned worker over SSH;
//! - [`scheduler`] advances the virtual clock and releases epoch files as atomic store
//!   transactions;
//! - [`oracle`] precompiles explicit routes into new epoch files, offline;
//! - [`stats`] summarizes an epoch stream and the current worker usage;
//! - [`status`] reports the system state and inspects single nodes;
//! - [`worker`] is the only abstraction allowed to touch remote hosts.
//!
//! The long-lived per-container process lives in the `sat-agent` crate.

pub mod config;
pub mod deploy;
pub mod oracle;
pub mod placement;
pub mod scheduler;
pub mod stats;
pub mod status;
pub mod worker;

use sat_store::StoreError;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::oracle::OracleError;
use crate::placement::PlacementError;
use crate::scheduler::SchedulerError;
use crate::worker::WorkerError;

#[cfg(test)]
mod test;

/// Error type of the control commands, mapped onto process exit codes.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Placement failed (validation, capacity or address pool).
    #[error("{0}")]
    Placement(#[from] PlacementError),
    /// Deployment finished with per-node failures.
    #[error("{0}")]
    Deploy(#[from] DeployError),
    /// The epoch scheduler failed.
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),
    /// The oracle precompiler failed.
    #[error("{0}")]
    Oracle(#[from] OracleError),
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// A remote command failed.
    #[error("{0}")]
    Worker(#[from] WorkerError),
    /// I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Anything else, reported as a plain message.
    #[error("{0}")]
    Other(String),
}

impl ControlError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlError::Placement(PlacementError::Validation(_)) => 2,
            ControlError::Placement(PlacementError::InsufficientCapacity { .. }) => 3,
            ControlError::Placement(PlacementError::AddressPoolExhausted { .. }) => 4,
            ControlError::Deploy(DeployError::PartialFailure { .. }) => 5,
            _ => 1,
        }
    }
}
