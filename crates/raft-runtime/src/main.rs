//! raft-local -- run a raft cluster inside one process.
//!
//! Starts N nodes over the in-process network, writes a few key/value
//! commands through the leader and prints every node's status as json.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use raft_core::{RaftConfig, Verbosity};
use raft_runtime::{KvCommand, LocalCluster};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raft-local", version, about = "Run an in-process raft cluster")]
struct Cli {
    /// Number of nodes; node 1 bootstraps the cluster.
    #[arg(short, long, default_value_t = 3)]
    nodes: u64,

    /// JSON file with RaftConfig fields; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persist each node under DIR/node-{id} instead of in memory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Delete the data dir before starting.
    #[arg(long, requires = "data_dir")]
    fresh: bool,

    /// quiet, normal or verbose.
    #[arg(short, long)]
    verbosity: Option<Verbosity>,

    #[arg(long)]
    election_timeout_ms: Option<u64>,

    /// key=value pairs to write once a leader is up.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    sets: Vec<String>,

    /// Exit after printing the status instead of waiting for Ctrl-C.
    #[arg(long)]
    once: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<RaftConfig> {
    let mut config = match &cli.config {
        Some(path) => RaftConfig::from_json_file(path)?,
        None => RaftConfig::default(),
    };
    if let Some(base) = cli.election_timeout_ms {
        config.election_timeout_base_ms = base;
        config.heartbeat_interval_ms = (base / 5).max(1);
    }
    if let Some(verbosity) = cli.verbosity {
        config.verbosity = verbosity;
    }
    config.validate()?;
    Ok(config)
}

fn parse_set(pair: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got '{pair}'"))?;
    // bare words are taken as strings
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let default_level = match config.verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if let (Some(dir), true) = (&cli.data_dir, cli.fresh) {
        if dir.exists() {
            std::fs::remove_dir_all(dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
    }

    let sets = if cli.sets.is_empty() {
        vec!["x=1".to_string(), "y=2".to_string()]
    } else {
        cli.sets.clone()
    };

    let cluster = LocalCluster::start(cli.nodes, config.clone(), cli.data_dir.clone())?;
    let leader = cluster
        .wait_for_leader(Duration::from_millis(config.election_timeout_base_ms * 20))
        .await?;
    info!(leader, "leader elected");

    for pair in &sets {
        let (key, value) = parse_set(pair)?;
        let response = cluster.submit(KvCommand::set(key.as_str(), value), false).await?;
        info!(key = %key, status = ?response.status, result = ?response.result, "set");
    }

    let statuses = cluster.statuses().await;
    println!("{}", serde_json::to_string_pretty(&statuses)?);

    if !cli.once {
        shutdown_signal().await;
    }
    cluster.shutdown().await;
    Ok(())
}

/// Wait for Ctrl+C (or SIGTERM on unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
