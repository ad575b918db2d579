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

//! Agent startup and the main event loop.

use std::sync::Arc;
use std::time::Duration;

use sat_store::{keys, NodeSpec, Store, StoreExt};

use crate::hosts::HostsFile;
use crate::kernel::Kernel;
use crate::links::LinkManager;
use crate::routing::{self, RoutingModule};
use crate::tasks::TaskRunner;
use crate::AgentError;

/// Retry period while waiting for the own node specification to appear.
const SPEC_RETRY: Duration = Duration::from_secs(2);
/// Attempts while waiting for the own node specification.
const SPEC_ATTEMPTS: u32 = 30;

/// The per-container agent.
pub struct Agent {
    node: String,
    spec: NodeSpec,
    eth0: std::net::Ipv4Addr,
    store: Arc<dyn Store>,
    kernel: Arc<dyn Kernel>,
    routing: Arc<dyn RoutingModule>,
    hosts: HostsFile,
}

impl Agent {
    /// Initialization (T1): register the underlay address, create the antenna bridges,
    /// publish the primary overlay address, fill the hosts file and initialize the routing
    /// module. Runs exactly once, before any link event is processed.
    pub async fn bootstrap(
        node: impl Into<String>,
        store: Arc<dyn Store>,
        kernel: Arc<dyn Kernel>,
        hosts: HostsFile,
    ) -> Result<Self, AgentError> {
        let node = node.into();
        log::info!("[{node}] agent starting");

        let mut spec = fetch_spec(store.as_ref(), &node).await?;

        // discover and register the own underlay address
        let eth0 = kernel.eth0_ipv4().await?;
        if spec.eth0_ip != Some(eth0) {
            spec.eth0_ip = Some(eth0);
            store.put_json(&keys::node(&node), &spec).await?;
            log::info!("[{node}] registered underlay address {eth0}");
        }

        // one bridge per antenna, carrying the overlay host addresses when assigned
        let overlay_hosts: Vec<std::net::Ipv4Addr> = spec
            .l3
            .cidr
            .map(|net| net.hosts().collect())
            .unwrap_or_default();
        let enough = overlay_hosts.len() >= spec.n_antennas as usize + 1;
        if !enough && spec.l3.cidr.is_some() {
            log::warn!(
                "[{node}] subnet {} too small for {} antennas, bridges stay unnumbered",
                spec.l3.cidr.unwrap(),
                spec.n_antennas
            );
        }
        for antenna in 1..=spec.n_antennas {
            let addr = enough.then(|| overlay_hosts[antenna as usize - 1]);
            kernel.ensure_bridge(&format!("br{antenna}"), addr).await?;
        }

        // publish the primary overlay address
        if let Some(primary) = spec.primary_overlay_addr() {
            store
                .put(&keys::etchost(&node), primary.to_string().into_bytes())
                .await?;
        }

        // seed the hosts file with everything already registered
        seed_hosts(store.as_ref(), &hosts).await?;

        // routing module init, strictly before the first link event
        let routing: Arc<dyn RoutingModule> = if spec.l3.enable_routing {
            routing::resolve(spec.l3.routing_module.as_deref(), &spec.l3.routing_metadata).into()
        } else {
            Arc::new(routing::NoopRouting)
        };
        let outcome = routing.init(store.as_ref(), &node).await;
        if outcome.ok {
            log::info!("[{node}] routing module {} initialized", routing.name());
        } else {
            log::warn!(
                "[{node}] routing module {} init failed: {}",
                routing.name(),
                outcome.message
            );
        }

        Ok(Self {
            node,
            spec,
            eth0,
            store,
            kernel,
            routing,
            hosts,
        })
    }

    /// The main event loop (T2 and T3): reconcile links, execute tasks, mirror the hosts
    /// prefix. Returns cleanly when `shutdown` resolves, draining the in-flight operation.
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), AgentError> {
        let Agent {
            node,
            spec,
            eth0,
            store,
            kernel,
            routing,
            hosts,
        } = self;

        let mut links = LinkManager::new(
            &node,
            eth0,
            spec.l3.enable_netem,
            store.clone(),
            kernel,
            routing,
        );

        // watches are registered before the initial resync: everything published before the
        // registration is covered by the listing, everything after by the stream, and both
        // reconcilers deduplicate on revisions
        let mut link_watch = store.watch_prefix(&keys::links_of(&node), None).await?;
        let mut run_watch = store.watch_prefix(&keys::run(&node), None).await?;
        let mut hosts_watch = store.watch_prefix(keys::ETCHOSTS, None).await?;

        links.resync().await?;
        let mut tasks = TaskRunner::new(&node, store.clone());
        tasks.run_pending().await?;

        log::info!("[{node}] watching for changes");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("[{node}] shutdown requested, exiting cleanly");
                    return Ok(());
                }
                event = link_watch.next() => {
                    let event = event.ok_or_else(|| {
                        AgentError::WatchClosed(keys::links_of(&node))
                    })?;
                    links.handle_event(event).await?;
                }
                event = run_watch.next() => {
                    let event = event.ok_or_else(|| {
                        AgentError::WatchClosed(keys::run(&node))
                    })?;
                    match event {
                        sat_store::WatchEvent::ResyncRequired => tasks.run_pending().await?,
                        event => tasks.handle_event(event).await?,
                    }
                }
                event = hosts_watch.next() => {
                    let event = event.ok_or_else(|| {
                        AgentError::WatchClosed(keys::ETCHOSTS.to_string())
                    })?;
                    match event {
                        sat_store::WatchEvent::ResyncRequired => {
                            seed_hosts(store.as_ref(), &hosts).await?;
                        }
                        event => hosts.handle_event(&event),
                    }
                }
            }
        }
    }
}

/// Mirror every registered overlay address into the hosts file.
async fn seed_hosts(store: &dyn Store, hosts: &HostsFile) -> Result<(), AgentError> {
    for kv in store.get_prefix(keys::ETCHOSTS).await? {
        let name = keys::last_segment(&kv.key);
        let addr = String::from_utf8_lossy(&kv.value).trim().to_string();
        if !addr.is_empty() {
            if let Err(e) = hosts.upsert(name, &addr) {
                log::error!("cannot update hosts file: {e}");
            }
        }
    }
    Ok(())
}

/// Wait for the own node specification to appear in the store.
async fn fetch_spec(store: &dyn Store, node: &str) -> Result<NodeSpec, AgentError> {
    for attempt in 0..SPEC_ATTEMPTS {
        if let Some(spec) = store.get_json::<NodeSpec>(&keys::node(node)).await? {
            return Ok(spec);
        }
        log::debug!("[{node}] waiting for node specification ({attempt})");
        tokio::time::sleep(SPEC_RETRY).await;
    }
    Err(AgentError::MissingSpec(node.to_string()))
}
