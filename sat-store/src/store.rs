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

//! The key-value store abstraction.
//!
//! All components are written against the [`Store`] trait. Semantics expected from an
//! implementation:
//!
//! - every mutation carries a strictly monotonic revision;
//! - a transaction applies all its operations atomically under a single revision, and
//!   watchers observe the operations of one transaction in order, without interleaving;
//! - a prefix watch started at revision `r` delivers every event with revision `> r`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error kind returned by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store endpoint cannot be reached, or the connection was lost.
    #[error("store connection error: {0}")]
    Connection(String),
    /// A transaction was rejected by the store.
    #[error("store transaction rejected: {0}")]
    Txn(String),
    /// A stored value is not valid JSON for the expected type.
    #[error("cannot decode value at {key}: {source}")]
    Decode {
        /// Key of the malformed value.
        key: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A value cannot be encoded as JSON.
    #[error("cannot encode value for {key}: {source}")]
    Encode {
        /// Target key.
        key: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// A key together with its current value and modification revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key path.
    pub key: String,
    /// Raw value bytes (UTF-8 JSON by convention).
    pub value: Vec<u8>,
    /// Revision of the last mutation of this key.
    pub revision: i64,
}

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    /// Write `value` at `key`.
    Put {
        /// Target key.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete `key` (a no-op if the key does not exist).
    Delete {
        /// Target key.
        key: String,
    },
}

impl TxnOp {
    /// Build a put operation with a JSON-encoded value.
    pub fn put_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        let key = key.into();
        let value = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        Ok(TxnOp::Put { key, value })
    }

    /// Build a delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    /// The key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            TxnOp::Put { key, .. } | TxnOp::Delete { key } => key,
        }
    }
}

/// One event observed on a watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or overwritten.
    Put {
        /// Full key path.
        key: String,
        /// New value bytes.
        value: Vec<u8>,
        /// Revision of the mutation.
        revision: i64,
    },
    /// A key was deleted.
    Delete {
        /// Full key path.
        key: String,
        /// Revision of the mutation.
        revision: i64,
    },
    /// The stream lost continuity (reconnect, compaction): the consumer must list the prefix
    /// again and diff against its local state before processing further events.
    ResyncRequired,
    /// The stream is permanently broken and will deliver no further events.
    Fatal(String),
}

impl WatchEvent {
    /// Revision of the event, if it carries one.
    pub fn revision(&self) -> Option<i64> {
        match self {
            WatchEvent::Put { revision, .. } | WatchEvent::Delete { revision, .. } => {
                Some(*revision)
            }
            _ => None,
        }
    }
}

/// An ordered stream of watch events on a prefix.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchStream {
    /// Build a stream from its receiving half.
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// The replicated key-value store, as seen by all components.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a single key.
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Write a single key.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a single key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys under a prefix, sorted by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Delete every key under a prefix in a single atomic batch.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError>;

    /// Apply all operations atomically under one revision, in the given order.
    async fn txn(&self, ops: Vec<TxnOp>) -> Result<(), StoreError>;

    /// Watch a prefix, delivering every event with a revision greater than `after_revision`
    /// (or every future event if `None`). The stream reconnects internally and emits
    /// [`WatchEvent::ResyncRequired`] whenever continuity may have been lost.
    async fn watch_prefix(
        &self,
        prefix: &str,
        after_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError>;
}

/// JSON convenience helpers shared by every consumer of the store.
#[async_trait]
pub trait StoreExt: Store {
    /// Read and decode a JSON value.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(kv) => serde_json::from_slice(&kv.value)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Encode and write a JSON value.
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put(key, bytes).await
    }

    /// Write a JSON value only if it differs from the stored one. Returns whether a write
    /// happened.
    async fn put_json_if_different<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        if let Some(existing) = self.get(key).await? {
            if existing.value == bytes {
                return Ok(false);
            }
        }
        self.put(key, bytes).await?;
        Ok(true)
    }

    /// List and decode all JSON values under a prefix, keyed by the last path segment.
    async fn get_prefix_json<T: DeserializeOwned + Send>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let mut out = Vec::new();
        for kv in self.get_prefix(prefix).await? {
            let value =
                serde_json::from_slice(&kv.value).map_err(|source| StoreError::Decode {
                    key: kv.key.clone(),
                    source,
                })?;
            out.push((crate::keys::last_segment(&kv.key).to_string(), value));
        }
        Ok(out)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
