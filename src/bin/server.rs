//! raftkv server binary.
//!
//! Loads the shared cluster config, constructs a [`ConsensusEngine`],
//! spawns its background election and heartbeat loops, and serves the
//! HTTP transport until terminated.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raftkv::config::ReplicaConfig;
use raftkv::consensus::ConsensusEngine;

#[derive(Parser)]
#[command(name = "raftkv-server")]
#[command(about = "raftkv replica server")]
struct Args {
    /// Path to the shared cluster TOML config.
    #[arg(short, long, default_value = "raftkv.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "raftkv=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ReplicaConfig::load(&args.config)?;

    tracing::info!(
        name = %config.name,
        port = config.server_port,
        peers = ?config.other_ports,
        "starting raftkv replica"
    );

    let seed = rand::thread_rng().gen::<u64>();
    let engine = Arc::new(ConsensusEngine::new(config, seed)?);

    let election = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_election_loop().await }
    });
    let heartbeat = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_heartbeat_loop().await }
    });

    tokio::select! {
        res = raftkv::server::run(engine) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    election.abort();
    heartbeat.abort();
    Ok(())
}
