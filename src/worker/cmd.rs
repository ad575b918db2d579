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

//! Typed remote commands.
//!
//! A [`RemoteCmd`] captures tool, arguments, environment, optional stdin and a deadline, and
//! renders itself into a properly quoted remote command line exactly once. The [`docker`]
//! module builds every docker invocation the deployer and the `exec`/`cp` subcommands use.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default per-invocation deadline for remote commands.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// A single remote command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCmd {
    /// The program to run.
    pub tool: String,
    /// Its arguments, unquoted.
    pub args: Vec<String>,
    /// Environment variables set for the remote process.
    pub env: BTreeMap<String, String>,
    /// Bytes piped into the remote stdin.
    pub stdin: Option<Vec<u8>>,
    /// Deadline for the whole invocation, connection included.
    pub deadline: Duration,
}

impl RemoteCmd {
    /// Create a command with the default deadline.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I: IntoIterator<Item = T>, T: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the remote process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Replace the deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Pipe bytes into the remote stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Render the quoted remote command line. Environment variables are prefixed with
    /// `env K=V ...` so they survive the remote shell.
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.env.is_empty() {
            parts.push("env".to_string());
            for (key, value) in &self.env {
                parts.push(shell_quote(&format!("{key}={value}")));
            }
        }
        parts.push(shell_quote(&self.tool));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

impl std::fmt::Display for RemoteCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Quote one shell word with single quotes when needed.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@,{}".contains(&b));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Builders for every docker invocation issued on workers.
pub mod docker {
    use super::RemoteCmd;
    use sat_store::{EtcdConfig, NodeSpec, WorkerSpec};

    /// Label that marks containers managed by this emulation.
    pub const LABEL: &str = "constellation.managed";
    /// Path of the CA certificate inside a container.
    pub const CA_CERT_PATH: &str = "/app/etcd-ca.crt";

    /// List the names of all managed containers (running or not).
    pub fn ps_managed_names() -> RemoteCmd {
        RemoteCmd::new("docker")
            .args(["ps", "-a", "--filter"])
            .arg(format!("label={LABEL}"))
            .args(["--format", "{{.Names}}"])
    }

    /// Force-remove one container.
    pub fn rm(name: &str) -> RemoteCmd {
        RemoteCmd::new("docker").args(["rm", "-f", name])
    }

    /// Start one node container, attached to the worker bridge and privileged (the agent
    /// creates VXLAN interfaces and bridges inside).
    pub fn run(
        name: &str,
        node: &NodeSpec,
        worker: &WorkerSpec,
        etcd: &EtcdConfig,
    ) -> RemoteCmd {
        let mut cmd = RemoteCmd::new("docker")
            .args(["run", "-d", "--name", name, "--hostname", name, "--net"])
            .arg(worker.sat_vnet.as_str())
            .args(["--privileged", "--pull=always", "--label", LABEL]);
        if !node.cpu_limit.is_empty() {
            cmd = cmd.arg("--cpus").arg(node.cpu_limit.as_str());
        }
        if !node.mem_limit.is_empty() {
            cmd = cmd.arg("--memory").arg(node.mem_limit.as_str());
        }
        cmd = cmd
            .arg("-e")
            .arg(format!("NODE_NAME={name}"))
            .arg("-e")
            .arg(format!("ETCD_ENDPOINT={}", etcd.endpoint()));
        if let (Some(user), Some(password)) = (&etcd.user, &etcd.password) {
            cmd = cmd
                .arg("-e")
                .arg(format!("ETCD_USER={user}"))
                .arg("-e")
                .arg(format!("ETCD_PASSWORD={password}"));
            if etcd.ca_cert.is_some() {
                cmd = cmd.arg("-e").arg(format!("ETCD_CA_CERT={CA_CERT_PATH}"));
            }
        }
        cmd.arg(node.image.as_str())
    }

    /// Copy a file from the worker filesystem into a container.
    pub fn cp_into_container(src: &str, container: &str, dst: &str) -> RemoteCmd {
        RemoteCmd::new("docker")
            .args(["cp", src])
            .arg(format!("{container}:{dst}"))
    }

    /// docker-cp between a local path spec and a container path spec, run on the worker.
    pub fn cp(src: &str, dst: &str) -> RemoteCmd {
        RemoteCmd::new("docker").args(["cp", src, dst])
    }

    /// Execute a command inside a container.
    pub fn exec(container: &str, interactive: bool, detached: bool, cmd: &[String]) -> RemoteCmd {
        let mut remote = RemoteCmd::new("docker").arg("exec");
        if interactive {
            remote = remote.args(["-i", "-t"]);
        }
        if detached {
            remote = remote.arg("-d");
        }
        remote.arg(container).args(cmd.iter().cloned())
    }
}
