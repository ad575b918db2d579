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

//! The deployer: one container per node, reconciled in parallel.
//!
//! Deployment is idempotent. For every `NodeSpec` the deployer removes any container of the
//! same name on the target worker and starts a fresh one; containers carrying the management
//! label but no matching spec are orphans and get removed. A failed node never blocks its
//! siblings; the command reports per-node results and fails with a partial-failure error if
//! any node could not be started.

use std::collections::BTreeMap;
use std::sync::Arc;

use sat_store::{keys, EtcdConfig, NodeSpec, Store, StoreError, StoreExt, WorkerSpec};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::worker::{docker, WorkerError, WorkerSession};

/// Concurrent container operations per worker, to keep dockerd responsive.
const PER_WORKER_LIMIT: usize = 4;

/// Error raised by the deployer.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Some nodes could not be deployed. Per-node errors have been logged.
    #[error("{failed} of {total} nodes failed to deploy")]
    PartialFailure {
        /// Number of failed nodes.
        failed: usize,
        /// Total number of nodes.
        total: usize,
    },
    /// No node specifications exist in the store.
    #[error("no nodes found in the store; run `constellation init` first")]
    NothingToDeploy,
    /// A store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),
    /// A remote operation failed outside the per-node fan-out.
    #[error("{0}")]
    Worker(#[from] WorkerError),
}

/// Options of the `deploy` subcommand.
#[derive(Debug, Clone)]
pub struct DeployOpts {
    /// Global parallelism of the fan-out.
    pub threads: usize,
    /// Only deploy nodes of this type (`satellite`, `gateway`, `user`).
    pub only: Option<String>,
    /// Store endpoint handed into the containers.
    pub etcd: EtcdConfig,
}

/// Deploy all nodes and remove orphaned containers.
pub async fn run_deploy<S: Store + ?Sized>(
    store: &S,
    opts: DeployOpts,
) -> Result<(), DeployError> {
    let workers: BTreeMap<String, WorkerSpec> = store
        .get_prefix_json(keys::WORKERS)
        .await?
        .into_iter()
        .collect();
    let nodes: Vec<(String, NodeSpec)> = store
        .get_prefix_json::<NodeSpec>(keys::NODES)
        .await?
        .into_iter()
        .filter(|(_, spec)| {
            opts.only
                .as_ref()
                .map(|t| &spec.node_type == t)
                .unwrap_or(true)
        })
        .collect();
    if nodes.is_empty() {
        return Err(DeployError::NothingToDeploy);
    }

    let sessions: BTreeMap<String, WorkerSession> = workers
        .iter()
        .map(|(name, spec)| (name.clone(), WorkerSession::new(name, spec)))
        .collect();

    log::info!(
        "deploying {} nodes on {} workers ({} parallel)",
        nodes.len(),
        workers.len(),
        opts.threads
    );

    let global = Arc::new(Semaphore::new(opts.threads.max(1)));
    let per_worker: BTreeMap<String, Arc<Semaphore>> = workers
        .keys()
        .map(|name| (name.clone(), Arc::new(Semaphore::new(PER_WORKER_LIMIT))))
        .collect();

    let mut join_set = JoinSet::new();
    let total = nodes.len();
    let mut desired: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, node) in nodes {
        let Some(worker_name) = node.worker.clone() else {
            log::error!("[{name}] node has no worker assigned, skipping");
            continue;
        };
        let (Some(session), Some(worker_spec)) =
            (sessions.get(&worker_name), workers.get(&worker_name))
        else {
            log::error!("[{name}] unknown worker {worker_name:?}, skipping");
            continue;
        };
        desired.entry(worker_name.clone()).or_default().push(name.clone());

        let session = session.clone();
        let worker_spec = worker_spec.clone();
        let etcd = opts.etcd.clone();
        let global = global.clone();
        let limit = per_worker[&worker_name].clone();
        join_set.spawn(async move {
            let _global = global.acquire_owned().await.unwrap();
            let _local = limit.acquire_owned().await.unwrap();
            let result = deploy_one(&session, &name, &node, &worker_spec, &etcd).await;
            (name, result)
        });
    }

    let mut failed = 0;
    while let Some(joined) = join_set.join_next().await {
        let Ok((name, result)) = joined else { continue };
        match result {
            Ok(()) => log::info!("[{name}] deployed"),
            Err(e) => {
                failed += 1;
                log::error!("[{name}] deployment failed: {e}");
            }
        }
    }

    remove_orphans(&sessions, &desired).await;

    if failed > 0 {
        Err(DeployError::PartialFailure { failed, total })
    } else {
        log::info!("all {total} nodes deployed");
        Ok(())
    }
}

/// Recreate one container: remove a stale one, start the new one, ship the CA certificate.
async fn deploy_one(
    session: &WorkerSession,
    name: &str,
    node: &NodeSpec,
    worker: &WorkerSpec,
    etcd: &EtcdConfig,
) -> Result<(), WorkerError> {
    // ignore failures here: the container may simply not exist
    let _ = session.execute_status(&docker::rm(name)).await?;

    session.execute(&docker::run(name, node, worker, etcd)).await?;

    if let (Some(_), Some(_), Some(ca)) = (&etcd.user, &etcd.password, &etcd.ca_cert) {
        let remote_tmp = format!("/tmp/etcd-ca-{name}.crt");
        session.scp_to(&ca.to_string_lossy(), &remote_tmp).await?;
        session
            .execute(&docker::cp_into_container(
                &remote_tmp,
                name,
                docker::CA_CERT_PATH,
            ))
            .await?;
    }
    Ok(())
}

/// Remove managed containers that no longer have a node specification.
async fn remove_orphans(
    sessions: &BTreeMap<String, WorkerSession>,
    desired: &BTreeMap<String, Vec<String>>,
) {
    for (worker_name, session) in sessions {
        let running = match session.execute(&docker::ps_managed_names()).await {
            Ok((stdout, _)) => stdout,
            Err(e) => {
                log::warn!("[{worker_name}] cannot list containers: {e}");
                continue;
            }
        };
        let wanted = desired.get(worker_name).cloned().unwrap_or_default();
        for orphan in running
            .lines()
            .map(str::trim)
            .filter(|n| !n.is_empty() && !wanted.iter().any(|w| w == n))
        {
            log::info!("[{worker_name}] removing orphan container {orphan}");
            if let Err(e) = session.execute(&docker::rm(orphan)).await {
                log::warn!("[{worker_name}] cannot remove orphan {orphan}: {e}");
            }
        }
    }
}

/// Tear down the whole emulation: remove every managed container and wipe the store.
pub async fn run_rm<S: Store + ?Sized>(store: &S) -> Result<(), DeployError> {
    let workers: BTreeMap<String, WorkerSpec> = store
        .get_prefix_json(keys::WORKERS)
        .await?
        .into_iter()
        .collect();
    for (name, spec) in &workers {
        let session = WorkerSession::new(name, spec);
        match session.execute(&docker::ps_managed_names()).await {
            Ok((stdout, _)) => {
                for container in stdout.lines().map(str::trim).filter(|n| !n.is_empty()) {
                    log::info!("[{name}] removing container {container}");
                    if let Err(e) = session.execute(&docker::rm(container)).await {
                        log::warn!("[{name}] cannot remove {container}: {e}");
                    }
                }
            }
            Err(e) => log::warn!("[{name}] cannot list containers: {e}"),
        }
    }
    store.delete_prefix(keys::CONFIG).await?;
    store.delete_prefix("/state/").await?;
    log::info!("emulation state removed");
    Ok(())
}

/// Delete every link record in one batch, leaving nodes and workers in place.
pub async fn run_unlink<S: Store + ?Sized>(store: &S) -> Result<(), DeployError> {
    store.delete_prefix(keys::LINKS).await?;
    log::info!("all links removed");
    Ok(())
}
