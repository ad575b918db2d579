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

//! SSH sessions with worker hosts.
//!
//! Sessions multiplex over an OpenSSH control master, authenticate with the key configured in
//! the worker specification, and run in batch mode so a missing key fails fast instead of
//! prompting. SSH transport failures surface as exit code 255 and are reported separately
//! from remote command failures.

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use sat_store::WorkerSpec;

use super::{RemoteCmd, WorkerError};

/// An SSH session with one worker host.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    name: String,
    destination: String,
    key_path: String,
}

impl WorkerSession {
    /// Create a session handle for a worker. No connection is attempted yet; the control
    /// master is established lazily by the first command.
    pub fn new(name: impl Into<String>, spec: &WorkerSpec) -> Self {
        Self {
            name: name.into(),
            destination: format!("{}@{}", spec.ssh_user, spec.ip),
            key_path: spec.ssh_key.clone(),
        }
    }

    /// The worker name, used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Verify that the worker is reachable by running `echo test` remotely.
    pub async fn verify(&self) -> Result<(), WorkerError> {
        let cmd = RemoteCmd::new("echo").arg("test");
        let (stdout, _) = self.execute(&cmd).await?;
        if stdout.trim() == "test" {
            Ok(())
        } else {
            Err(WorkerError::Ssh {
                worker: self.name.clone(),
                message: format!("expected `test`, but got {stdout:?}"),
            })
        }
    }

    /// Build the raw ssh command with multiplexing and batch mode configured.
    fn raw_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-oControlMaster=auto")
            .arg("-oControlPath=/tmp/.ssh-%r@%h:%p")
            .arg("-oControlPersist=10m")
            .arg("-oBatchMode=yes")
            .arg("-oStrictHostKeyChecking=no")
            .arg(&self.destination);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Execute a remote command and return its trimmed stdout and stderr. Fails on non-zero
    /// exit codes, distinguishing transport errors (255) from remote command failures.
    pub async fn execute(&self, remote: &RemoteCmd) -> Result<(String, String), WorkerError> {
        let line = remote.command_line();
        log::trace!("[{}] `{line}`", self.name);

        let mut cmd = self.raw_command();
        cmd.arg("--").arg(&line);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if remote.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;
        if let Some(bytes) = &remote.stdin {
            let mut stdin = child.stdin.take().unwrap();
            stdin.write_all(bytes).await?;
        }

        let output = match timeout(remote.deadline, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(WorkerError::Timeout {
                    worker: self.name.clone(),
                    cmd: line,
                })
            }
        };

        let stdout = String::from_utf8(output.stdout)?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        match output.status.code() {
            Some(0) => Ok((stdout, stderr)),
            Some(255) => Err(WorkerError::Ssh {
                worker: self.name.clone(),
                message: stderr
                    .lines()
                    .next()
                    .unwrap_or("ssh transport error")
                    .to_string(),
            }),
            code => {
                log::debug!(
                    "[{}] `{line}` exited with {:?}\nSTDERR:\n{stderr}",
                    self.name,
                    code
                );
                Err(WorkerError::Exec {
                    worker: self.name.clone(),
                    cmd: line,
                    exit_code: code.unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                })
            }
        }
    }

    /// Execute a remote command and return its exit status without checking it.
    pub async fn execute_status(&self, remote: &RemoteCmd) -> Result<ExitStatus, WorkerError> {
        let line = remote.command_line();
        log::trace!("[{}] `{line}`", self.name);
        let mut cmd = self.raw_command();
        cmd.arg("--").arg(&line);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        match timeout(remote.deadline, cmd.status()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkerError::Timeout {
                worker: self.name.clone(),
                cmd: line,
            }),
        }
    }

    /// Copy a local file to the worker.
    pub async fn scp_to(&self, src: &str, dst: &str) -> Result<(), WorkerError> {
        log::trace!("[{}] scp {src} -> {dst}", self.name);
        let mut cmd = Command::new("scp");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-oControlMaster=auto")
            .arg("-oControlPath=/tmp/.ssh-%r@%h:%p")
            .arg("-oControlPersist=10m")
            .arg("-oBatchMode=yes")
            .arg("-oStrictHostKeyChecking=no")
            .arg(src)
            .arg(format!("{}:{dst}", self.destination));
        cmd.kill_on_drop(true);
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WorkerError::Ssh {
                worker: self.name.clone(),
                message: String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .next()
                    .unwrap_or("scp transport error")
                    .to_string(),
            })
        }
    }

    /// Copy a remote file from the worker to the local host.
    pub async fn scp_from(&self, src: &str, dst: &str) -> Result<(), WorkerError> {
        log::trace!("[{}] scp {src} <- {dst}", self.name);
        let mut cmd = Command::new("scp");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-oControlMaster=auto")
            .arg("-oControlPath=/tmp/.ssh-%r@%h:%p")
            .arg("-oControlPersist=10m")
            .arg("-oBatchMode=yes")
            .arg("-oStrictHostKeyChecking=no")
            .arg(format!("{}:{src}", self.destination))
            .arg(dst);
        cmd.kill_on_drop(true);
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WorkerError::Ssh {
                worker: self.name.clone(),
                message: String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .next()
                    .unwrap_or("scp transport error")
                    .to_string(),
            })
        }
    }

    /// Build an interactive ssh command (terminal allocated, stdio inherited) for the
    /// `exec -it` passthrough. The caller runs it as a blocking foreground process.
    pub fn interactive_command(&self, remote: &RemoteCmd) -> std::process::Command {
        let mut cmd = std::process::Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .arg("-oBatchMode=yes")
            .arg("-oStrictHostKeyChecking=no")
            .arg("-t")
            .arg(&self.destination)
            .arg("--")
            .arg(remote.command_line());
        cmd
    }
}
