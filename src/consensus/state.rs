//! In-memory replica state: the role lock and the replica (log) lock.
//!
//! Two locks, always taken in the order **replica, then role** whenever a
//! path needs both. Outbound network fan-out (vote requests, replication
//! rounds) never holds either lock across an `.await`: callers snapshot
//! what they need, drop the lock, run the network round, then reacquire to
//! fold the results back in.

use std::time::Instant;

use parking_lot::RwLock;

use super::log::ReplicationLog;
use super::types::{MetaInfo, ReplicaId, Role, RoleTag, Term};

/// Everything protected by the replica lock: the log itself and how far
/// the state machine has been applied.
pub struct ReplicaData {
    pub log: ReplicationLog,
    pub commit_index: u64,
    /// Highest log index folded into the applied store so far. Always
    /// `<= commit_index`; the gap (if any) is applied the next time
    /// `commit_index` is checked.
    pub last_applied: u64,
}

impl ReplicaData {
    pub fn new() -> Self {
        Self {
            log: ReplicationLog::new(),
            commit_index: 0,
            last_applied: 0,
        }
    }
}

impl Default for ReplicaData {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything protected by the role lock: the current term, who this
/// replica voted for this term, the last known leader, and the tagged
/// per-role runtime data.
pub struct RoleState {
    pub term: Term,
    pub voted_for: Option<ReplicaId>,
    pub leader_id: Option<ReplicaId>,
    pub role: Role,
}

impl RoleState {
    pub fn snapshot(&self) -> MetaInfo {
        MetaInfo {
            term: self.term,
            role: self.role.tag(),
            leader_id: self.leader_id,
            voted_for: self.voted_for,
        }
    }
}

/// The two locks that make up a replica's consensus state, plus this
/// replica's own identity.
pub struct ConsensusState {
    pub id: ReplicaId,
    pub replica: RwLock<ReplicaData>,
    pub role: RwLock<RoleState>,
}

impl ConsensusState {
    /// Construct fresh state for `id`. `start_as_leader` is used only to
    /// bootstrap a brand-new cluster or a single-node test harness; every
    /// other replica starts as a Follower in term 0.
    pub fn new(id: ReplicaId, election_deadline: Instant, start_as_leader: bool) -> Self {
        let role = if start_as_leader {
            Role::Leader(super::types::LeaderState::default())
        } else {
            Role::Follower(super::types::FollowerState { election_deadline })
        };
        let leader_id = if start_as_leader { Some(id) } else { None };
        Self {
            id,
            replica: RwLock::new(ReplicaData::new()),
            role: RwLock::new(RoleState {
                term: 0,
                voted_for: None,
                leader_id,
                role,
            }),
        }
    }

    /// Cheap snapshot of the role state, for status reporting and RPC
    /// preconditions.
    pub fn meta(&self) -> MetaInfo {
        self.role.read().snapshot()
    }

    pub fn is_leader(&self) -> bool {
        self.role.read().role.tag() == RoleTag::Leader
    }

    /// Unconditionally step down to Follower in `term`, clearing any
    /// candidate/leader-only data. Used whenever a higher term is observed
    /// on any RPC, in either direction.
    pub fn step_down(&self, term: Term, election_deadline: Instant) {
        let mut role = self.role.write();
        role.term = term;
        role.voted_for = None;
        role.leader_id = None;
        role.role = Role::Follower(super::types::FollowerState { election_deadline });
    }
}
