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

//! The worker executor: the only abstraction allowed to touch remote hosts.
//!
//! Remote commands are modelled as typed [`RemoteCmd`] records and executed over an SSH
//! [`WorkerSession`], so quoting and deadlines live in one place and tests can assert command
//! lines without a shell.

mod cmd;
mod ssh;

pub use cmd::{docker, RemoteCmd};
pub use ssh::WorkerSession;

use thiserror::Error;

/// Error kind returned by the worker executor.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The SSH transport to the worker failed (exit code 255 or connection refused).
    #[error("ssh transport error to {worker}: {message}")]
    Ssh {
        /// Worker name.
        worker: String,
        /// First line of the transport error.
        message: String,
    },
    /// The per-invocation deadline expired.
    #[error("deadline expired while running {cmd} on {worker}")]
    Timeout {
        /// Worker name.
        worker: String,
        /// The command that timed out.
        cmd: String,
    },
    /// The remote command ran and failed.
    #[error("command {cmd} on {worker} exited with {exit_code}: {stderr}")]
    Exec {
        /// Worker name.
        worker: String,
        /// The failing command.
        cmd: String,
        /// Remote exit code.
        exit_code: i32,
        /// Trimmed stderr of the remote command.
        stderr: String,
    },
    /// Local I/O error while spawning ssh/scp.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote output is not valid UTF-8.
    #[error("cannot parse output as UTF-8: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
}
