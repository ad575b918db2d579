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

//! The link reconciler.
//!
//! The reconciler mirrors `/config/links/{node}/` into the local kernel. Each event either
//! creates a VXLAN interface, recreates it when the tunnel identity changed, reapplies the
//! netem shaping, or tears the interface down. Reconciliation compares the desired record
//! against the actual kernel state and only issues operations for real differences, so
//! re-delivered events and full resyncs are cheap no-ops.
//!
//! Kernel failures are logged and leave the record out of the local map; the next resync
//! retries the operation. The reconciler never takes the agent down.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use sat_store::{keys, LinkRecord, NodeSpec, Store, StoreExt, WatchEvent};

use crate::kernel::{Kernel, VxlanSpec};
use crate::routing::RoutingModule;
use crate::AgentError;

/// How often and how long to wait for a peer to register its underlay address.
const PEER_ADDR_ATTEMPTS: u32 = 10;
const PEER_ADDR_RETRY: Duration = Duration::from_secs(2);

/// Prefix of all overlay interface names.
const IFACE_PREFIX: &str = "vl_";

/// Reconciles the published half-links of one node against the kernel.
pub struct LinkManager {
    node: String,
    eth0: Ipv4Addr,
    enable_netem: bool,
    store: Arc<dyn Store>,
    kernel: Arc<dyn Kernel>,
    routing: Arc<dyn RoutingModule>,
    links: HashMap<String, LinkRecord>,
    last_revision: Option<i64>,
}

impl LinkManager {
    /// Create a reconciler. `eth0` is the agent's own underlay address.
    pub fn new(
        node: impl Into<String>,
        eth0: Ipv4Addr,
        enable_netem: bool,
        store: Arc<dyn Store>,
        kernel: Arc<dyn Kernel>,
        routing: Arc<dyn RoutingModule>,
    ) -> Self {
        Self {
            node: node.into(),
            eth0,
            enable_netem,
            store,
            kernel,
            routing,
            links: HashMap::new(),
            last_revision: None,
        }
    }

    /// The revision of the last processed event, for resuming the watch.
    pub fn last_revision(&self) -> Option<i64> {
        self.last_revision
    }

    /// Process one watch event.
    pub async fn handle_event(&mut self, event: WatchEvent) -> Result<(), AgentError> {
        match event {
            WatchEvent::Put {
                key,
                value,
                revision,
            } => {
                if self.already_seen(revision) {
                    return Ok(());
                }
                let iface = keys::last_segment(&key).to_string();
                match serde_json::from_slice::<LinkRecord>(&value) {
                    Ok(record) => self.apply_put(&iface, record).await,
                    Err(e) => log::warn!("[{}] malformed link record at {key}: {e}", self.node),
                }
                self.last_revision = Some(revision);
            }
            WatchEvent::Delete { key, revision } => {
                if self.already_seen(revision) {
                    return Ok(());
                }
                let iface = keys::last_segment(&key).to_string();
                self.apply_delete(&iface).await;
                self.last_revision = Some(revision);
            }
            WatchEvent::ResyncRequired => self.resync().await?,
            WatchEvent::Fatal(message) => {
                return Err(AgentError::WatchClosed(format!(
                    "{}: {message}",
                    keys::links_of(&self.node)
                )))
            }
        }
        Ok(())
    }

    fn already_seen(&self, revision: i64) -> bool {
        self.last_revision.map(|last| revision <= last).unwrap_or(false)
    }

    /// Full list-then-diff against the kernel, used at startup and after watch reconnects.
    pub async fn resync(&mut self) -> Result<(), AgentError> {
        log::info!("[{}] resyncing links", self.node);
        let mut desired: HashMap<String, LinkRecord> = HashMap::new();
        for kv in self.store.get_prefix(&keys::links_of(&self.node)).await? {
            self.last_revision = Some(self.last_revision.unwrap_or(0).max(kv.revision));
            match serde_json::from_slice::<LinkRecord>(&kv.value) {
                Ok(record) => {
                    desired.insert(keys::last_segment(&kv.key).to_string(), record);
                }
                Err(e) => log::warn!("[{}] malformed link record at {}: {e}", self.node, kv.key),
            }
        }

        match self.kernel.list_links(IFACE_PREFIX).await {
            Ok(present) => {
                for iface in present {
                    if !desired.contains_key(&iface) {
                        self.apply_delete(&iface).await;
                    }
                }
            }
            Err(e) => log::warn!("[{}] cannot list interfaces: {e}", self.node),
        }

        for (iface, record) in desired {
            self.apply_put(&iface, record).await;
        }
        Ok(())
    }

    /// Apply one desired half-link.
    async fn apply_put(&mut self, iface: &str, record: LinkRecord) {
        let Some((peer, _)) = record.peer_of(&self.node) else {
            log::warn!(
                "[{}] link {} - {} is not relevant to this node",
                self.node,
                record.endpoint1,
                record.endpoint2
            );
            return;
        };
        let peer = peer.to_string();
        let bridge = match record.local_antenna_of(&self.node) {
            Some(antenna) => format!("br{antenna}"),
            None => return,
        };

        // same record and the interface is present: re-delivery, nothing to do
        if self.links.get(iface) == Some(&record)
            && self.kernel.link_exists(iface).await.unwrap_or(false)
        {
            return;
        }

        let exists = match self.kernel.link_exists(iface).await {
            Ok(exists) => exists,
            Err(e) => {
                log::error!("[{}] kernel error on {iface}: {e}", self.node);
                return;
            }
        };

        if exists {
            let kernel_vni = self.kernel.vxlan_id(iface).await.ok().flatten();
            let same_tunnel = kernel_vni == Some(record.vni)
                && self
                    .links
                    .get(iface)
                    .map(|prior| prior.same_tunnel(&record))
                    .unwrap_or(false);
            if same_tunnel {
                // shaping-only change: replace the qdisc, leave the tunnel alone
                self.apply_shaping(iface, &record).await;
                self.links.insert(iface.to_string(), record);
                return;
            }
            // conflicting underlying state: recreate, draining routes first
            log::info!("[{}] recreating {iface} (stale tunnel)", self.node);
            self.apply_delete(iface).await;
        }

        let Some(remote) = self.peer_underlay_addr(&peer).await else {
            log::warn!(
                "[{}] skipping {iface}: peer {peer} has no underlay address",
                self.node
            );
            return;
        };

        let spec = VxlanSpec {
            iface: iface.to_string(),
            vni: record.vni,
            remote,
            local: self.eth0,
            bridge,
        };
        log::info!("[{}] creating {iface} (vni {})", self.node, record.vni);
        if let Err(e) = self.kernel.create_vxlan(&spec).await {
            log::error!("[{}] cannot create {iface}: {e}", self.node);
            return;
        }
        self.apply_shaping(iface, &record).await;

        let outcome = self
            .routing
            .link_add(self.store.as_ref(), &self.node, iface)
            .await;
        if !outcome.ok {
            log::warn!(
                "[{}] routing {} link_add({iface}) failed: {}",
                self.node,
                self.routing.name(),
                outcome.message
            );
        }
        self.links.insert(iface.to_string(), record);
    }

    /// Tear one interface down, draining routes first.
    async fn apply_delete(&mut self, iface: &str) {
        let outcome = self
            .routing
            .link_del(self.store.as_ref(), &self.node, iface)
            .await;
        if !outcome.ok {
            log::warn!(
                "[{}] routing {} link_del({iface}) failed: {}",
                self.node,
                self.routing.name(),
                outcome.message
            );
        }
        if self.enable_netem {
            if let Err(e) = self.kernel.clear_netem(iface).await {
                log::debug!("[{}] clearing netem on {iface}: {e}", self.node);
            }
        }
        log::info!("[{}] deleting {iface}", self.node);
        if let Err(e) = self.kernel.delete_link(iface).await {
            log::error!("[{}] cannot delete {iface}: {e}", self.node);
        }
        self.links.remove(iface);
    }

    async fn apply_shaping(&self, iface: &str, record: &LinkRecord) {
        if !self.enable_netem {
            return;
        }
        let result = if record.shaping.is_empty() {
            self.kernel.clear_netem(iface).await
        } else {
            self.kernel.apply_netem(iface, &record.shaping).await
        };
        if let Err(e) = result {
            log::error!("[{}] cannot shape {iface}: {e}", self.node);
        }
    }

    /// Look up the peer's underlay address, waiting for it to register if necessary.
    async fn peer_underlay_addr(&self, peer: &str) -> Option<Ipv4Addr> {
        for attempt in 0..PEER_ADDR_ATTEMPTS {
            match self.store.get_json::<NodeSpec>(&keys::node(peer)).await {
                Ok(Some(spec)) => {
                    if let Some(addr) = spec.eth0_ip {
                        return Some(addr);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("[{}] cannot read spec of {peer}: {e}", self.node),
            }
            if attempt + 1 < PEER_ADDR_ATTEMPTS {
                tokio::time::sleep(PEER_ADDR_RETRY).await;
            }
        }
        None
    }
}
