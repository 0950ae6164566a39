//! Core data types shared by every consensus module: terms, replica
//! identities, log entries, and the flat `MetaInfo` snapshot used for
//! status reporting and wire replies.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// A replica is identified by its own listen port, matching the wire
/// format's integer `candidate_id` / `leader_id` fields.
pub type ReplicaId = u32;

/// Monotonically non-decreasing logical clock identifying leadership epochs.
pub type Term = u64;

/// Command carried by a log entry. `Get` is never itself proposed (reads
/// are served locally) but is kept in the enum so the wire-compatible
/// integer numbering lines up across the whole command space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Command {
    /// Synthetic sentinel command at log index 0.
    Init = 0,
    /// Insert a new key; fails if it already exists.
    Create = 1,
    /// Read a key; never appears in the replicated log.
    Get = 2,
    /// Overwrite an existing key; fails if absent.
    Set = 3,
    /// Overwrite an existing key iff its current value matches.
    Cas = 4,
    /// Remove an existing key; fails if absent.
    Delete = 5,
}

/// One entry in the replicated log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term in which this entry was created.
    pub term: Term,
    /// The state-machine command this entry carries.
    pub command: Command,
    /// Target key. Unused (empty) for the sentinel entry.
    #[serde(default)]
    pub key: String,
    /// New value, present for `Create`/`Set`/`Cas`.
    #[serde(default)]
    pub value: Option<String>,
    /// Expected current value, present only for `Cas`.
    #[serde(default)]
    pub compare_value: Option<String>,
}

impl LogEntry {
    /// The synthetic sentinel entry that occupies log index 0.
    pub fn sentinel() -> Self {
        Self {
            term: 0,
            command: Command::Init,
            key: String::new(),
            value: None,
            compare_value: None,
        }
    }
}

/// Tag-only view of the current role, used in [`MetaInfo`] and wire
/// replies. The runtime-only fields that differ per role (election
/// deadlines, vote tallies, per-peer match index) live on [`Role`] in
/// `state.rs`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleTag {
    Follower,
    Candidate,
    Leader,
}

/// Flat, cheaply-cloned snapshot of a replica's role state: the single
/// source of truth for "what is this replica doing right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaInfo {
    pub term: Term,
    pub role: RoleTag,
    pub leader_id: Option<ReplicaId>,
    pub voted_for: Option<ReplicaId>,
}

/// Runtime-only follower data: when this replica will give up on the
/// current leader and convert to Candidate.
#[derive(Debug, Clone)]
pub struct FollowerState {
    pub election_deadline: Instant,
}

/// Runtime-only candidate data: when the current vote round gives up and
/// retries, plus who has granted a vote so far this term.
#[derive(Debug, Clone)]
pub struct CandidateState {
    pub election_deadline: Instant,
    pub votes_received: HashSet<ReplicaId>,
}

/// Runtime-only leader data: the per-peer match-index table used to pick
/// `prev_log_index` for the next `AppendEntries` to each peer.
#[derive(Debug, Clone, Default)]
pub struct LeaderState {
    pub match_index: std::collections::HashMap<ReplicaId, u64>,
}

/// Tagged union of per-role runtime data (redesign flag #3 in the design
/// notes, adopted): each variant only carries the fields meaningful for
/// that role, so "only a Leader has a match index table" is enforced by
/// the type rather than by convention.
#[derive(Debug, Clone)]
pub enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    pub fn tag(&self) -> RoleTag {
        match self {
            Role::Follower(_) => RoleTag::Follower,
            Role::Candidate(_) => RoleTag::Candidate,
            Role::Leader(_) => RoleTag::Leader,
        }
    }
}

/// Failure returned by a client-triggered proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeError {
    /// This replica is not the current leader.
    NotLeader { leader_hint: Option<ReplicaId> },
    /// The proposal was appended locally but failed to reach a majority of
    /// peers; the leader has already rolled back its tentative append.
    ReplicationFailed,
}

impl std::fmt::Display for ProposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposeError::NotLeader { leader_hint } => {
                write!(f, "not the leader (hint: {:?})", leader_hint)
            }
            ProposeError::ReplicationFailed => write!(f, "failed to replicate to a majority"),
        }
    }
}

impl std::error::Error for ProposeError {}
