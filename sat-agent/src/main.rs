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

use std::sync::Arc;
use std::time::Duration;

use sat_agent::hosts::HostsFile;
use sat_agent::kernel::IpRoute2;
use sat_agent::Agent;
use sat_store::{EtcdConfig, EtcdStore};

/// The agent is single-threaded and cooperative: one event loop serializes link
/// reconciliation, task execution and hosts maintenance.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    pretty_env_logger::init_timed();

    let Ok(node) = std::env::var("NODE_NAME") else {
        eprintln!("NODE_NAME is not set");
        std::process::exit(1);
    };

    let config = EtcdConfig::from_env();
    let store = loop {
        match EtcdStore::connect(config.clone()).await {
            Ok(store) => break store,
            Err(e) => {
                log::warn!("[{node}] cannot reach the store: {e}, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    };

    let agent = match Agent::bootstrap(
        &node,
        Arc::new(store),
        Arc::new(IpRoute2),
        HostsFile::system(),
    )
    .await
    {
        Ok(agent) => agent,
        Err(e) => {
            log::error!("[{node}] bootstrap failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = agent.run(shutdown_signal()).await {
        log::error!("[{node}] agent failed: {e}");
        std::process::exit(1);
    }
}

/// Resolves on SIGINT or SIGTERM, so the agent drains cleanly and leaves the kernel state
/// intact for its successor.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                log::warn!("cannot install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
                return;
            }
        };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
