//! Wire types exchanged between replicas over the `/raft` HTTP routes.
//!
//! Field names use `parent_log_index`/`parent_log_term`/
//! `leader_commit_index` rather than common Raft-paper terminology
//! (`prev_log_index`, `prev_log_term`, `leader_commit`), matching this
//! cluster's established wire format.

use serde::{Deserialize, Serialize};

use super::types::{LogEntry, ReplicaId, Term};

/// Candidate's request for a vote in a new term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: ReplicaId,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

/// Vote response. `term` lets the candidate step down if it's stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Leader's replication / heartbeat call. An empty `entries` vector is a
/// pure heartbeat; a non-empty one asks the follower to adopt the suffix
/// starting right after `parent_log_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: ReplicaId,
    pub parent_log_index: u64,
    pub parent_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit_index: u64,
}

/// Reply to an `AppendEntries` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
}
