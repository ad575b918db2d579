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

//! In-memory implementation of the [`Store`] trait.
//!
//! `MemStore` implements the full store contract in process memory: monotonic revisions,
//! atomic transactions, ordered prefix watches with replay from a revision. It backs the
//! test-suites of every crate in the workspace, the same way the simulated executor stands in
//! for the physical lab.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::{KeyValue, Store, StoreError, TxnOp, WatchEvent, WatchStream};

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<String, (Vec<u8>, i64)>,
    revision: i64,
    history: Vec<WatchEvent>,
    watchers: Vec<Watcher>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

/// An in-memory store with etcd-like semantics, for tests.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current head revision.
    pub fn revision(&self) -> i64 {
        self.inner.lock().unwrap().revision
    }

    fn apply(&self, ops: Vec<TxnOp>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value } => {
                    inner.map.insert(key.clone(), (value.clone(), revision));
                    events.push(WatchEvent::Put {
                        key,
                        value,
                        revision,
                    });
                }
                TxnOp::Delete { key } => {
                    if inner.map.remove(&key).is_some() {
                        events.push(WatchEvent::Delete { key, revision });
                    }
                }
            }
        }
        for event in events {
            inner.history.push(event.clone());
            let key = match &event {
                WatchEvent::Put { key, .. } | WatchEvent::Delete { key, .. } => key.clone(),
                _ => continue,
            };
            inner
                .watchers
                .retain(|w| !key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
        }
        revision
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.map.get(key).map(|(value, revision)| KeyValue {
            key: key.to_string(),
            value: value.clone(),
            revision: *revision,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.apply(vec![TxnOp::Put {
            key: key.to_string(),
            value,
        }]);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.apply(vec![TxnOp::Delete {
            key: key.to_string(),
        }]);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (value, revision))| KeyValue {
                key: k.clone(),
                value: value.clone(),
                revision: *revision,
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let keys: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner
                .map
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect()
        };
        self.apply(keys.into_iter().map(TxnOp::delete).collect());
        Ok(())
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> Result<(), StoreError> {
        self.apply(ops);
        Ok(())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        after_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        if let Some(after) = after_revision {
            for event in &inner.history {
                let (key, revision) = match event {
                    WatchEvent::Put { key, revision, .. }
                    | WatchEvent::Delete { key, revision } => (key, *revision),
                    _ => continue,
                };
                if revision > after && key.starts_with(prefix) {
                    let _ = tx.send(event.clone());
                }
            }
        }
        inner.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx))
    }
}
