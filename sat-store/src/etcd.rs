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

//! The etcd-backed implementation of the [`Store`] trait.
//!
//! Watches reconnect internally with exponential backoff (capped at 30 s). After every
//! reconnect the stream emits [`WatchEvent::ResyncRequired`], and resumes from the last
//! observed revision so no event is lost between the resync listing and the stream.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, DeleteOptions, EventType, GetOptions, TlsOptions, Txn,
    WatchOptions,
};
use tokio::sync::mpsc;

use crate::store::{KeyValue, Store, StoreError, TxnOp, WatchEvent, WatchStream};

/// Maximum backoff between watch reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection parameters for the etcd cluster, usually taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct EtcdConfig {
    /// Host name or address of the etcd endpoint.
    pub host: String,
    /// Client port (2379 by default).
    pub port: u16,
    /// Optional user for authentication.
    pub user: Option<String>,
    /// Optional password for authentication.
    pub password: Option<String>,
    /// Optional path to the TLS root certificate.
    pub ca_cert: Option<PathBuf>,
}

impl EtcdConfig {
    /// Read the connection parameters from `ETCD_HOST`, `ETCD_PORT`, `ETCD_USER`,
    /// `ETCD_PASSWORD` and `ETCD_CA_CERT`. `ETCD_ENDPOINT` (`host:port`) takes precedence
    /// over host and port, matching what the deployer passes into containers.
    pub fn from_env() -> Self {
        let mut host = std::env::var("ETCD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mut port = std::env::var("ETCD_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(2379);
        if let Ok(endpoint) = std::env::var("ETCD_ENDPOINT") {
            match endpoint.rsplit_once(':') {
                Some((h, p)) => {
                    host = h.to_string();
                    port = p.parse().unwrap_or(2379);
                }
                None => host = endpoint,
            }
        }
        Self {
            host,
            port,
            user: std::env::var("ETCD_USER").ok().filter(|s| !s.is_empty()),
            password: std::env::var("ETCD_PASSWORD").ok().filter(|s| !s.is_empty()),
            ca_cert: std::env::var("ETCD_CA_CERT")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    /// The `host:port` endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A [`Store`] backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    config: EtcdConfig,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoint", &self.config.endpoint())
            .finish()
    }
}

impl EtcdStore {
    /// Connect to the configured etcd endpoint, verifying the connection with a status call.
    pub async fn connect(config: EtcdConfig) -> Result<Self, StoreError> {
        log::debug!("connecting to etcd at {}", config.endpoint());
        let client = connect_client(&config).await?;
        let mut maintenance = client.maintenance_client();
        maintenance
            .status()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        log::info!("connected to etcd at {}", config.endpoint());
        Ok(Self { client, config })
    }
}

async fn connect_client(config: &EtcdConfig) -> Result<Client, StoreError> {
    let mut options = ConnectOptions::new();
    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        options = options.with_user(user.as_str(), password.as_str());
    }
    if let Some(ca_path) = &config.ca_cert {
        let pem = tokio::fs::read(ca_path).await.map_err(|e| {
            StoreError::Connection(format!("cannot read CA certificate {ca_path:?}: {e}"))
        })?;
        options = options.with_tls(TlsOptions::new().ca_certificate(Certificate::from_pem(pem)));
    }
    Client::connect([config.endpoint()], Some(options))
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

fn convert_kv(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        revision: kv.mod_revision(),
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(key, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(resp.kvs().first().map(convert_kv))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut kv = self.client.kv_client();
        kv.put(key, value, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut kv = self.client.kv_client();
        kv.delete(key, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let mut kvs: Vec<KeyValue> = resp.kvs().iter().map(convert_kv).collect();
        kvs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(kvs)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let mut kv = self.client.kv_client();
        kv.delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let etcd_ops: Vec<etcd_client::TxnOp> = ops
            .into_iter()
            .map(|op| match op {
                TxnOp::Put { key, value } => etcd_client::TxnOp::put(key, value, None),
                TxnOp::Delete { key } => etcd_client::TxnOp::delete(key, None),
            })
            .collect();
        let mut kv = self.client.kv_client();
        let resp = kv
            .txn(Txn::new().and_then(etcd_ops))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(StoreError::Txn("transaction compare failed".to_string()))
        }
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        after_revision: Option<i64>,
    ) -> Result<WatchStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = self.config.clone();
        let client = self.client.clone();
        let prefix = prefix.to_string();
        tokio::spawn(watch_loop(client, config, prefix, after_revision, tx));
        Ok(WatchStream::new(rx))
    }
}

/// Drive one prefix watch, reconnecting forever until the consumer goes away.
async fn watch_loop(
    mut client: Client,
    config: EtcdConfig,
    prefix: String,
    after_revision: Option<i64>,
    tx: mpsc::UnboundedSender<WatchEvent>,
) {
    let mut last_revision = after_revision;
    let mut backoff = Duration::from_secs(1);
    let mut first_attempt = true;
    loop {
        let mut options = WatchOptions::new().with_prefix();
        if let Some(rev) = last_revision {
            options = options.with_start_revision(rev + 1);
        }
        let result = client.watch_client().watch(prefix.as_str(), Some(options)).await;
        match result {
            Ok((_watcher, mut stream)) => {
                if !first_attempt && tx.send(WatchEvent::ResyncRequired).is_err() {
                    return;
                }
                first_attempt = false;
                backoff = Duration::from_secs(1);
                loop {
                    match stream.message().await {
                        Ok(Some(resp)) => {
                            for event in resp.events() {
                                let Some(kv) = event.kv() else { continue };
                                let revision = kv.mod_revision();
                                last_revision = Some(last_revision.unwrap_or(0).max(revision));
                                let key = String::from_utf8_lossy(kv.key()).into_owned();
                                let out = match event.event_type() {
                                    EventType::Put => WatchEvent::Put {
                                        key,
                                        value: kv.value().to_vec(),
                                        revision,
                                    },
                                    EventType::Delete => WatchEvent::Delete { key, revision },
                                };
                                if tx.send(out).is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("watch on {prefix} broken: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("cannot establish watch on {prefix}: {e}");
                // try a fresh connection before the next attempt
                if let Ok(fresh) = connect_client(&config).await {
                    client = fresh;
                }
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
