//! HTTP transport.
//!
//! Two routers share one [`ConsensusEngine`]: a client-facing API mounted
//! at `/api`, and a peer-facing API mounted at `/raft`. Both are served
//! off the same listener.

mod client_api;
mod peer_api;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::consensus::ConsensusEngine;

/// Bind and serve both routers on `engine`'s configured port until the
/// process is terminated.
pub async fn run(engine: Arc<ConsensusEngine>) -> Result<()> {
    let port = engine.id();
    let app = axum::Router::new()
        .nest("/api", client_api::router(engine.clone()))
        .nest("/raft", peer_api::router(engine));

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server loop exited")?;
    Ok(())
}
