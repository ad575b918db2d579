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

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sat_store::{keys, EtcdConfig, EtcdStore, NodeSpec, Store, StoreExt, WorkerSpec};

use constellation::config::{IpStack, SatConfig};
use constellation::deploy::{self, DeployOpts};
use constellation::oracle::{self, OracleOpts};
use constellation::placement;
use constellation::scheduler::{self, RunOpts};
use constellation::stats;
use constellation::status;
use constellation::worker::{docker, RemoteCmd, WorkerSession};
use constellation::ControlError;

/// Manage an emulated satellite constellation: place nodes on workers, deploy containers,
/// replay epoch timelines and precompile oracle routes.
#[derive(Debug, Parser)]
#[clap(name = "constellation", version)]
struct Cli {
    #[clap(flatten)]
    etcd: EtcdOpts,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct EtcdOpts {
    /// Etcd host.
    #[clap(long, env = "ETCD_HOST", default_value = "127.0.0.1", global = true)]
    etcd_host: String,
    /// Etcd client port.
    #[clap(long, env = "ETCD_PORT", default_value_t = 2379, global = true)]
    etcd_port: u16,
    /// Etcd user.
    #[clap(long, env = "ETCD_USER", global = true)]
    etcd_user: Option<String>,
    /// Etcd password.
    #[clap(long, env = "ETCD_PASSWORD", global = true)]
    etcd_password: Option<String>,
    /// Path to the etcd TLS root certificate.
    #[clap(long, env = "ETCD_CA_CERT", global = true)]
    etcd_ca_cert: Option<PathBuf>,
}

impl EtcdOpts {
    fn to_config(&self) -> EtcdConfig {
        EtcdConfig {
            host: self.etcd_host.clone(),
            port: self.etcd_port,
            user: self.etcd_user.clone(),
            password: self.etcd_password.clone(),
            ca_cert: self.etcd_ca_cert.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the static configuration, place nodes on workers, allocate overlay
    /// addresses and publish everything to the store.
    Init {
        /// Path to the configuration document.
        #[clap(short, long, default_value = "sat-config.json")]
        config: PathBuf,
        /// Address families to assign.
        #[clap(long, value_enum, default_value = "v4")]
        stack: IpStack,
    },
    /// Start one container per node on its assigned worker, removing orphans.
    Deploy {
        /// Parallel container operations.
        #[clap(short, long, default_value_t = num_threads())]
        threads: usize,
        /// Only deploy nodes of this type.
        #[clap(long)]
        only: Option<String>,
    },
    /// Replay the epoch timeline against the store.
    Run {
        /// Override the epoch directory from the store.
        #[clap(long)]
        epoch_dir: Option<PathBuf>,
        /// Override the epoch file pattern from the store.
        #[clap(long)]
        file_pattern: Option<String>,
        /// Ignore epoch times and release every N seconds.
        #[clap(long)]
        fixed_wait: Option<u64>,
        /// Loop the timeline with this delay (seconds) between iterations.
        #[clap(long)]
        loop_delay: Option<u64>,
        /// Watch the queue directory instead of scanning the epoch directory.
        #[clap(long)]
        interactive: bool,
    },
    /// Precompile explicit routes into a new epoch directory.
    Oracle {
        /// Override the epoch directory from the store.
        #[clap(long)]
        epoch_dir: Option<PathBuf>,
        /// Override the epoch file pattern from the store.
        #[clap(long)]
        file_pattern: Option<String>,
        /// Output directory for the generated epoch files.
        #[clap(long, default_value = "constellation-epochs-routes")]
        out_dir: PathBuf,
        /// Node type whose nodes become routing destinations.
        #[clap(long, default_value = "all")]
        node_type_to_route: String,
        /// Drain-before-break offset in milliseconds (0 disables drain files).
        #[clap(long, default_value_t = 0)]
        drain_offset: u64,
        /// Post-create route offset in milliseconds.
        #[clap(long, default_value_t = 0)]
        creation_offset: u64,
    },
    /// Print statistics of the epoch stream and the current worker usage.
    Stats {
        /// Override the epoch directory from the store.
        #[clap(long)]
        epoch_dir: Option<PathBuf>,
        /// Override the epoch file pattern from the store.
        #[clap(long)]
        file_pattern: Option<String>,
    },
    /// Summarize the emulation state held in the store.
    Status {
        /// Also ask every worker which containers are running.
        #[clap(short, long)]
        verbose: bool,
    },
    /// Report everything the store knows about one node.
    Inspect {
        /// Target node.
        node: String,
        /// Include image, resources and the full L3 configuration.
        #[clap(short, long)]
        verbose: bool,
    },
    /// Execute a command inside a node container, resolved through the store.
    Exec {
        /// Allocate a terminal and attach (like `docker exec -it`).
        #[clap(short, long)]
        interactive: bool,
        /// Accepted so the familiar `-it` spelling works.
        #[clap(short = 't', hide = true)]
        tty: bool,
        /// Run detached (like `docker exec -d`).
        #[clap(short, long, conflicts_with = "interactive")]
        detached: bool,
        /// Target node.
        node: String,
        /// Command to run inside the container.
        #[clap(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        cmd: Vec<String>,
    },
    /// Copy files between the local host and a node (`node:/path` on either side).
    Cp {
        /// Source (`/local/path` or `node:/path`).
        src: String,
        /// Destination (`/local/path` or `node:/path`).
        dst: String,
    },
    /// Delete every link record in one batch.
    Unlink,
    /// Tear down the emulation: remove all containers and wipe the store.
    Rm,
}

fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn main() {
    pretty_env_logger::init_timed();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("cannot start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(dispatch(cli)) {
        log::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(cli: Cli) -> Result<(), ControlError> {
    let etcd = cli.etcd.to_config();
    let store = EtcdStore::connect(etcd.clone()).await?;

    match cli.command {
        Command::Init { config, stack } => {
            let config = SatConfig::load(&config)
                .map_err(placement::PlacementError::from)?;
            placement::run_init(&store, &config, stack).await?;
        }
        Command::Deploy { threads, only } => {
            deploy::run_deploy(&store, DeployOpts { threads, only, etcd }).await?;
        }
        Command::Run {
            epoch_dir,
            file_pattern,
            fixed_wait,
            loop_delay,
            interactive,
        } => {
            let opts = RunOpts {
                epoch_dir,
                file_pattern,
                fixed_wait: fixed_wait.map(Duration::from_secs),
                loop_delay: loop_delay.map(Duration::from_secs),
                interactive,
            };
            scheduler::run(&store, opts, shutdown_signal()).await?;
        }
        Command::Oracle {
            epoch_dir,
            file_pattern,
            out_dir,
            node_type_to_route,
            drain_offset,
            creation_offset,
        } => {
            let opts = OracleOpts {
                epoch_dir,
                file_pattern,
                out_dir,
                node_type_to_route,
                drain_offset: Duration::from_millis(drain_offset),
                creation_offset: Duration::from_millis(creation_offset),
            };
            oracle::run_oracle(&store, opts).await?;
        }
        Command::Stats {
            epoch_dir,
            file_pattern,
        } => {
            stats::run_stats(&store, epoch_dir, file_pattern).await?;
        }
        Command::Status { verbose } => {
            status::run_status(&store, verbose).await?;
        }
        Command::Inspect { node, verbose } => {
            status::run_inspect(&store, &node, verbose).await?;
        }
        Command::Exec {
            interactive,
            tty,
            detached,
            node,
            cmd,
        } => {
            run_exec(&store, &node, interactive || tty, detached, cmd).await?;
        }
        Command::Cp { src, dst } => {
            run_cp(&store, &src, &dst).await?;
        }
        Command::Unlink => {
            deploy::run_unlink(&store).await?;
        }
        Command::Rm => {
            deploy::run_rm(&store).await?;
        }
    }
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
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
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Resolve a node to its worker session and spec through the store.
async fn resolve_node<S: Store + ?Sized>(
    store: &S,
    node: &str,
) -> Result<(WorkerSession, NodeSpec), ControlError> {
    let spec: NodeSpec = store
        .get_json(&keys::node(node))
        .await?
        .ok_or_else(|| ControlError::Other(format!("unknown node {node:?}")))?;
    let worker_name = spec
        .worker
        .clone()
        .ok_or_else(|| ControlError::Other(format!("node {node} has no worker assigned")))?;
    let worker: WorkerSpec = store
        .get_json(&keys::worker(&worker_name))
        .await?
        .ok_or_else(|| ControlError::Other(format!("unknown worker {worker_name:?}")))?;
    Ok((WorkerSession::new(&worker_name, &worker), spec))
}

async fn run_exec<S: Store + ?Sized>(
    store: &S,
    node: &str,
    interactive: bool,
    detached: bool,
    cmd: Vec<String>,
) -> Result<(), ControlError> {
    let (session, _) = resolve_node(store, node).await?;
    let remote = docker::exec(node, interactive, detached, &cmd);
    if interactive {
        let status = session.interactive_command(&remote).status()?;
        if !status.success() {
            std::process::exit(status.code().unwrap_or(1));
        }
    } else {
        let (stdout, stderr) = session.execute(&remote).await?;
        print!("{stdout}");
        eprint!("{stderr}");
    }
    Ok(())
}

/// docker-cp semantics over the worker executor. Exactly one side must be `node:/path`.
async fn run_cp<S: Store + ?Sized>(store: &S, src: &str, dst: &str) -> Result<(), ControlError> {
    let parse = |s: &str| -> Option<(String, String)> {
        let (node, path) = s.split_once(':')?;
        (!node.is_empty() && !path.is_empty()).then(|| (node.to_string(), path.to_string()))
    };
    match (parse(src), parse(dst)) {
        (Some((node, container_src)), None) => {
            let (session, _) = resolve_node(store, &node).await?;
            let staging = format!("/tmp/constellation-cp-{node}");
            session
                .execute(&docker::cp(&format!("{node}:{container_src}"), &staging))
                .await?;
            session.scp_from(&staging, dst).await?;
            session
                .execute(&RemoteCmd::new("rm").arg("-rf").arg(staging.as_str()))
                .await?;
        }
        (None, Some((node, container_dst))) => {
            let (session, _) = resolve_node(store, &node).await?;
            let staging = format!("/tmp/constellation-cp-{node}");
            session.scp_to(src, &staging).await?;
            session
                .execute(&docker::cp(&staging, &format!("{node}:{container_dst}")))
                .await?;
            session
                .execute(&RemoteCmd::new("rm").arg("-rf").arg(staging.as_str()))
                .await?;
        }
        _ => {
            return Err(ControlError::Other(
                "exactly one of src and dst must be node:/path".to_string(),
            ))
        }
    }
    Ok(())
}
