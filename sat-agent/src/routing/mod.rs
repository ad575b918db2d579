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

//! Pluggable routing modules.
//!
//! A routing module receives three callbacks: `init` once at agent startup (strictly before
//! the first link event), `link_add` after a VXLAN interface is up and enslaved, and
//! `link_del` before an interface is torn down, so routes can drain first. Callbacks never
//! fail hard; the outcome carries a message and a boolean, and the agent only logs failures.
//!
//! Modules are resolved from a registry of compiled-in implementations keyed by identifier.
//! An identifier containing a path separator instead names an external executable, driven
//! over a one-shot JSON exchange on stdin/stdout.

mod external;

pub use external::ExternalRouting;

use async_trait::async_trait;
use sat_store::Store;

/// Result of one routing callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingOutcome {
    /// Human-readable message for the agent log.
    pub message: String,
    /// Whether the callback succeeded.
    pub ok: bool,
}

impl RoutingOutcome {
    /// A successful outcome.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ok: true,
        }
    }

    /// A failed outcome.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ok: false,
        }
    }
}

/// The routing callback interface. All three entry points must be idempotent.
#[async_trait]
pub trait RoutingModule: Send + Sync {
    /// Identifier of the module, for logging.
    fn name(&self) -> &str;

    /// Called once per agent lifetime, before the first link event.
    async fn init(&self, store: &dyn Store, node: &str) -> RoutingOutcome;

    /// Called after the interface is up and attached to its bridge.
    async fn link_add(&self, store: &dyn Store, node: &str, iface: &str) -> RoutingOutcome;

    /// Called before the interface is torn down.
    async fn link_del(&self, store: &dyn Store, node: &str, iface: &str) -> RoutingOutcome;
}

/// The no-op module: every callback succeeds without doing anything. This is what nodes
/// without `enable-routing` run, and the fallback for unknown identifiers.
#[derive(Debug, Default)]
pub struct NoopRouting;

#[async_trait]
impl RoutingModule for NoopRouting {
    fn name(&self) -> &str {
        "noop"
    }

    async fn init(&self, _store: &dyn Store, _node: &str) -> RoutingOutcome {
        RoutingOutcome::ok("noop")
    }

    async fn link_add(&self, _store: &dyn Store, _node: &str, _iface: &str) -> RoutingOutcome {
        RoutingOutcome::ok("noop")
    }

    async fn link_del(&self, _store: &dyn Store, _node: &str, _iface: &str) -> RoutingOutcome {
        RoutingOutcome::ok("noop")
    }
}

/// Resolve a module identifier to an implementation.
///
/// `None`, the empty string and `"none"`/`"noop"` resolve to [`NoopRouting`]. Identifiers
/// with a path separator are external executables. Anything else falls back to noop with a
/// warning, so a typo in the configuration degrades instead of crashing every agent.
pub fn resolve(
    module: Option<&str>,
    metadata: &serde_json::Value,
) -> Box<dyn RoutingModule> {
    match module.unwrap_or_default() {
        "" | "none" | "noop" => Box::new(NoopRouting),
        path if path.contains('/') => {
            Box::new(ExternalRouting::new(path, metadata.clone()))
        }
        unknown => {
            log::warn!("unknown routing module {unknown:?}, falling back to noop");
            Box::new(NoopRouting)
        }
    }
}
