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

//! This library contains the store schema, the shared data model and the key-value store
//! abstraction used by every component of the constellation emulator.
//!
//! All persistent state of the emulation lives under `/config/*` in a strongly consistent,
//! hierarchical key-value store (etcd in production). Values are UTF-8 JSON. The control
//! commands (`constellation init`, `deploy`, `run`, ...) and the per-container node agents
//! never talk to each other directly; the store is the single authority, and every consumer
//! observes changes through an ordered watch stream with monotonic revisions.
//!
//! The [`Store`] trait captures exactly the operations the system relies on: atomic put and
//! delete, prefix scans, multi-key transactions, and ordered prefix watches that can be
//! resumed from a revision. Two implementations are provided: [`EtcdStore`] speaks to a real
//! etcd cluster, while [`MemStore`] implements the same semantics in process memory and backs
//! the test-suites of all crates in this workspace.

pub mod epoch;
pub mod keys;
mod mem;
mod store;
pub mod types;
pub mod units;
pub mod vni;

mod etcd;

pub use epoch::{format_epoch_time, list_epoch_files, EpochFile, EpochParseError, LinkChange};
pub use etcd::{EtcdConfig, EtcdStore};
pub use mem::MemStore;
pub use store::{KeyValue, Store, StoreError, StoreExt, TxnOp, WatchEvent, WatchStream};
pub use types::{
    iface_name, validate_node_name, AutoAssignRule, EpochConfig, L3Config, LinkRecord, NodeSpec,
    Shaping, TaskResult, WorkerSpec,
};
pub use vni::link_vni;

#[cfg(test)]
mod test;
