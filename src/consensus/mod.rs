//! Leader election and log replication.
//!
//! Submodules: [`types`] (terms, roles, log entries), [`log`] (the
//! replicated log itself), [`rpc`] (wire types for `/raft`), [`state`]
//! (the two locks backing a replica), and [`engine`] (the driver that
//! ties them together).

pub mod engine;
pub mod log;
pub mod rpc;
pub mod state;
pub mod types;

pub use engine::ConsensusEngine;
pub use rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse};
pub use types::{Command, LogEntry, MetaInfo, ProposeError, ReplicaId, Role, RoleTag, Term};
