//! # raftkv - a strongly consistent replicated key-value store
//!
//! raftkv keeps a small cluster of replicas in agreement via leader-based
//! log replication, then applies the agreed-upon log to an in-memory
//! `String -> String` store. Clients read and write through the current
//! leader only; followers serve no reads and accept no writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     HTTP transport                          │
//! │   /api  (client RPC)        /raft  (peer RPC)               │
//! ├───────────────────────────────────────────────────────────┤
//! │                    Consensus engine                         │
//! │   ├── role/term state machine                               │
//! │   ├── election driver                                       │
//! │   ├── heartbeat / replication driver                        │
//! │   └── inbound RequestVote / AppendEntries handlers           │
//! ├───────────────────────────────────────────────────────────┤
//! │                    Replicated log                            │
//! ├───────────────────────────────────────────────────────────┤
//! │                    Applied key-value store                   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Non-goals
//!
//! No runtime membership changes, no log compaction or snapshots, no
//! persistence across restarts, no read-index/lease-based follower reads,
//! no pipelined batching of proposals.

#![warn(missing_docs)]

pub mod config;
pub mod consensus;
pub mod error;
pub mod server;
pub mod store;

pub use config::ReplicaConfig;
pub use consensus::ConsensusEngine;
pub use error::StoreError;
pub use store::Store;

/// Common imports for wiring up a replica process.
pub mod prelude {
    //! Re-exports of the types most call sites need.

    pub use crate::config::ReplicaConfig;
    pub use crate::consensus::{
        Command, ConsensusEngine, LogEntry, MetaInfo, ProposeError, RoleTag,
    };
    pub use crate::error::StoreError;
    pub use crate::store::Store;
}
