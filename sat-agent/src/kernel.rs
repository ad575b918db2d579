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

//! The kernel command layer.
//!
//! Every interface, bridge and qdisc operation of the agent goes through the [`Kernel`]
//! trait. [`IpRoute2`] is the production implementation and shells out to `ip` and `tc`;
//! the recording mock used by the reconciler tests lives in [`mock`].

use std::net::Ipv4Addr;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sat_store::Shaping;
use thiserror::Error;
use tokio::process::Command;

/// VXLAN tunnels use the IANA port, never the legacy Linux default.
pub const VXLAN_PORT: u16 = 4789;
/// MTU of overlay interfaces, leaving room for the VXLAN and underlay headers.
pub const VXLAN_MTU: u16 = 1350;

/// Error raised by kernel operations. The reconciler logs these and retries on the next
/// event; they never crash the agent.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The command ran and failed.
    #[error("`{cmd}` exited with {exit_code}: {stderr}")]
    Failed {
        /// The command line.
        cmd: String,
        /// Its exit code.
        exit_code: i32,
        /// Trimmed stderr.
        stderr: String,
    },
    /// The command could not be spawned.
    #[error("cannot run {0}: {1}")]
    Spawn(String, std::io::Error),
    /// Command output could not be interpreted.
    #[error("cannot parse output of `{0}`: {1}")]
    Parse(String, String),
}

/// One VXLAN interface to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VxlanSpec {
    /// Interface name (`vl_{peer}_{antenna}`).
    pub iface: String,
    /// VXLAN network identifier.
    pub vni: u32,
    /// Underlay address of the peer.
    pub remote: Ipv4Addr,
    /// Own underlay address.
    pub local: Ipv4Addr,
    /// Local antenna bridge the interface is enslaved to.
    pub bridge: String,
}

/// The kernel operations the agent needs.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Discover the IPv4 address of `eth0`.
    async fn eth0_ipv4(&self) -> Result<Ipv4Addr, KernelError>;

    /// List all interface names starting with `prefix`.
    async fn list_links(&self, prefix: &str) -> Result<Vec<String>, KernelError>;

    /// Whether an interface exists.
    async fn link_exists(&self, iface: &str) -> Result<bool, KernelError>;

    /// The VNI of an existing VXLAN interface, `None` if it is not a VXLAN.
    async fn vxlan_id(&self, iface: &str) -> Result<Option<u32>, KernelError>;

    /// Create a VXLAN interface, set its MTU, enslave it to its bridge and bring it up.
    async fn create_vxlan(&self, spec: &VxlanSpec) -> Result<(), KernelError>;

    /// Delete an interface.
    async fn delete_link(&self, iface: &str) -> Result<(), KernelError>;

    /// Create a bridge if missing, bring it up, and optionally assign an address.
    async fn ensure_bridge(&self, name: &str, addr: Option<Ipv4Addr>) -> Result<(), KernelError>;

    /// Replace the root qdisc of an interface with the given netem parameters.
    async fn apply_netem(&self, iface: &str, shaping: &Shaping) -> Result<(), KernelError>;

    /// Remove the root qdisc of an interface, tolerating its absence.
    async fn clear_netem(&self, iface: &str) -> Result<(), KernelError>;
}

/// Production implementation: shell out to `ip` and `tc`.
#[derive(Debug, Clone, Default)]
pub struct IpRoute2;

impl IpRoute2 {
    async fn run(&self, args: &[&str]) -> Result<String, KernelError> {
        let cmd_str = args.join(" ");
        log::trace!("`{cmd_str}`");
        let output = Command::new(args[0])
            .args(&args[1..])
            .output()
            .await
            .map_err(|e| KernelError::Spawn(cmd_str.clone(), e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(KernelError::Failed {
                cmd: cmd_str,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn run_ok(&self, args: &[&str]) -> Result<(), KernelError> {
        self.run(args).await.map(|_| ())
    }
}

lazy_static! {
    static ref ADDR_RE: Regex = Regex::new(r"inet ([0-9.]+)/").unwrap();
    static ref VXLAN_ID_RE: Regex = Regex::new(r"vxlan id (\d+)").unwrap();
    static ref LINK_NAME_RE: Regex = Regex::new(r"^\d+:\s+([^:@\s]+)").unwrap();
}

#[async_trait]
impl Kernel for IpRoute2 {
    async fn eth0_ipv4(&self) -> Result<Ipv4Addr, KernelError> {
        let out = self.run(&["ip", "-4", "-o", "addr", "show", "eth0"]).await?;
        ADDR_RE
            .captures(&out)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| {
                KernelError::Parse(
                    "ip -4 -o addr show eth0".to_string(),
                    format!("no IPv4 address in {out:?}"),
                )
            })
    }

    async fn list_links(&self, prefix: &str) -> Result<Vec<String>, KernelError> {
        let out = self.run(&["ip", "-o", "link", "show"]).await?;
        Ok(out
            .lines()
            .filter_map(|line| LINK_NAME_RE.captures(line))
            .map(|c| c[1].to_string())
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn link_exists(&self, iface: &str) -> Result<bool, KernelError> {
        match self.run(&["ip", "link", "show", iface]).await {
            Ok(_) => Ok(true),
            Err(KernelError::Failed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn vxlan_id(&self, iface: &str) -> Result<Option<u32>, KernelError> {
        let out = self.run(&["ip", "-d", "link", "show", iface]).await?;
        Ok(VXLAN_ID_RE.captures(&out).and_then(|c| c[1].parse().ok()))
    }

    async fn create_vxlan(&self, spec: &VxlanSpec) -> Result<(), KernelError> {
        let vni = spec.vni.to_string();
        let remote = spec.remote.to_string();
        let local = spec.local.to_string();
        let port = VXLAN_PORT.to_string();
        self.run_ok(&[
            "ip", "link", "add", &spec.iface, "type", "vxlan", "id", &vni, "remote", &remote,
            "local", &local, "dev", "eth0", "dstport", &port,
        ])
        .await?;
        let mtu = VXLAN_MTU.to_string();
        self.run_ok(&["ip", "link", "set", &spec.iface, "mtu", &mtu])
            .await?;
        self.run_ok(&["ip", "link", "set", &spec.iface, "master", &spec.bridge])
            .await?;
        self.run_ok(&["ip", "link", "set", "dev", &spec.iface, "up"])
            .await
    }

    async fn delete_link(&self, iface: &str) -> Result<(), KernelError> {
        self.run_ok(&["ip", "link", "del", iface]).await
    }

    async fn ensure_bridge(&self, name: &str, addr: Option<Ipv4Addr>) -> Result<(), KernelError> {
        if !self.link_exists(name).await? {
            self.run_ok(&["ip", "link", "add", name, "type", "bridge"])
                .await?;
        }
        self.run_ok(&["ip", "link", "set", name, "up"]).await?;
        if let Some(addr) = addr {
            let cidr = format!("{addr}/32");
            // tolerate the address already being assigned
            if let Err(e) = self.run_ok(&["ip", "addr", "add", &cidr, "dev", name]).await {
                log::debug!("assigning {cidr} to {name}: {e}");
            }
        }
        Ok(())
    }

    async fn apply_netem(&self, iface: &str, shaping: &Shaping) -> Result<(), KernelError> {
        let mut args: Vec<String> = ["tc", "qdisc", "replace", "dev", iface, "root", "netem"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if let Some(rate) = &shaping.rate {
            args.extend(["rate".to_string(), rate.clone()]);
        }
        if let Some(delay) = &shaping.delay {
            args.extend(["delay".to_string(), delay.clone()]);
        }
        if let Some(loss) = &shaping.loss {
            args.extend(["loss".to_string(), loss.clone()]);
        }
        if let Some(limit) = shaping.limit {
            args.extend(["limit".to_string(), limit.to_string()]);
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_ok(&args).await
    }

    async fn clear_netem(&self, iface: &str) -> Result<(), KernelError> {
        match self
            .run_ok(&["tc", "qdisc", "del", "dev", iface, "root"])
            .await
        {
            Ok(()) => Ok(()),
            // no qdisc installed is fine
            Err(KernelError::Failed { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
