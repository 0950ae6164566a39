//! The `/api` router: the client-facing data plane.
//!
//! Writes are leader-only and go through [`ConsensusEngine::propose`];
//! reads are served directly from the local applied store with no quorum
//! (leader-stickiness only, per the non-goal on read-index/lease reads).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::consensus::{Command, ConsensusEngine, LogEntry, ProposeError};
use crate::error::StoreError;

pub fn router(engine: Arc<ConsensusEngine>) -> Router {
    Router::new()
        .route("/create", post(create))
        .route("/read", get(read))
        .route("/update", post(update))
        .route("/delete", post(delete))
        .route("/cas", post(cas))
        .route("/get_replicas", get(get_replicas))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct KeyValueRequest {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct KeyRequest {
    key: String,
}

#[derive(Debug, Deserialize)]
struct CasRequest {
    key: String,
    value: String,
    compare_value: String,
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    value: String,
}

#[derive(Debug, Serialize)]
struct ReplicasResponse {
    replicas: Vec<u32>,
}

fn propose_error_response(err: ProposeError) -> (StatusCode, Json<Value>) {
    match err {
        ProposeError::NotLeader { leader_hint } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "not leader", "leader_hint": leader_hint })),
        ),
        ProposeError::ReplicationFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "replication failed" })),
        ),
    }
}

fn store_error_response(err: StoreError) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
}

async fn create(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<KeyValueRequest>,
) -> (StatusCode, Json<Value>) {
    if engine.meta().role != crate::consensus::RoleTag::Leader {
        return propose_error_response(ProposeError::NotLeader {
            leader_hint: engine.meta().leader_id,
        });
    }
    if let Err(e) = engine.store().validate_create(&req.key) {
        return store_error_response(e);
    }
    let entry = LogEntry {
        term: 0,
        command: Command::Create,
        key: req.key,
        value: Some(req.value),
        compare_value: None,
    };
    match engine.propose(entry).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => propose_error_response(e),
    }
}

async fn update(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<KeyValueRequest>,
) -> (StatusCode, Json<Value>) {
    if engine.meta().role != crate::consensus::RoleTag::Leader {
        return propose_error_response(ProposeError::NotLeader {
            leader_hint: engine.meta().leader_id,
        });
    }
    if let Err(e) = engine.store().validate_set(&req.key) {
        return store_error_response(e);
    }
    let entry = LogEntry {
        term: 0,
        command: Command::Set,
        key: req.key,
        value: Some(req.value),
        compare_value: None,
    };
    match engine.propose(entry).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => propose_error_response(e),
    }
}

async fn delete(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<KeyRequest>,
) -> (StatusCode, Json<Value>) {
    if engine.meta().role != crate::consensus::RoleTag::Leader {
        return propose_error_response(ProposeError::NotLeader {
            leader_hint: engine.meta().leader_id,
        });
    }
    if let Err(e) = engine.store().validate_delete(&req.key) {
        return store_error_response(e);
    }
    let entry = LogEntry {
        term: 0,
        command: Command::Delete,
        key: req.key,
        value: None,
        compare_value: None,
    };
    match engine.propose(entry).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => propose_error_response(e),
    }
}

async fn cas(
    State(engine): State<Arc<ConsensusEngine>>,
    Json(req): Json<CasRequest>,
) -> (StatusCode, Json<Value>) {
    if engine.meta().role != crate::consensus::RoleTag::Leader {
        return propose_error_response(ProposeError::NotLeader {
            leader_hint: engine.meta().leader_id,
        });
    }
    if let Err(e) = engine.store().validate_cas(&req.key, &req.compare_value) {
        return store_error_response(e);
    }
    let entry = LogEntry {
        term: 0,
        command: Command::Cas,
        key: req.key,
        value: Some(req.value),
        compare_value: Some(req.compare_value),
    };
    match engine.propose(entry).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => propose_error_response(e),
    }
}

async fn read(
    State(engine): State<Arc<ConsensusEngine>>,
    Query(req): Query<KeyRequest>,
) -> Result<Json<ReadResponse>, (StatusCode, Json<Value>)> {
    if engine.meta().role != crate::consensus::RoleTag::Leader {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "not leader" })),
        ));
    }
    engine
        .store()
        .get(&req.key)
        .map(|value| Json(ReadResponse { value }))
        .map_err(store_error_response)
}

async fn get_replicas(State(engine): State<Arc<ConsensusEngine>>) -> Json<ReplicasResponse> {
    let mut replicas = engine.peers().to_vec();
    replicas.push(engine.id());
    Json(ReplicasResponse { replicas })
}
