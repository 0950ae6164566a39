//! The `/raft` router: inbound RPCs from other replicas.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, ConsensusEngine, RequestVoteRequest,
    RequestVoteResponse,
};

pub fn router(engine: Arc<ConsensusEngine>) -> Router {
    Router::new()
        .route("/request_vote", post(request_vote))
        .route("/add_log", post(add_log))
        .with_state(engine)
}

async fn request_vote(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<RequestVoteRequest>,
) -> Json<RequestVoteResponse> {
    Json(engine.handle_request_vote(req))
}

async fn add_log(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<AppendEntriesRequest>,
) -> Json<AppendEntriesResponse> {
    Json(engine.handle_append_entries(req))
}
