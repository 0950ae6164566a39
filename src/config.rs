//! Cluster membership and timer configuration.
//!
//! The member list and timer parameters are shared by every replica and
//! live in a single TOML file; each process then layers its own identity
//! (listen port, display name, whether it should bootstrap as leader) on
//! top via environment variables, so the same file can be mounted
//! read-only into every container in the cluster.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;

/// Environment variable carrying this replica's listen port.
pub const ENV_PORT: &str = "RAFTKV_PORT";
/// Environment variable carrying this replica's display name.
pub const ENV_NAME: &str = "RAFTKV_NAME";
/// Environment variable that, if set to any value, bootstraps this replica
/// directly into the Leader role instead of Follower.
pub const ENV_LEADER_ON_START: &str = "RAFTKV_LEADER_ON_START";

#[derive(Debug, Deserialize)]
struct FileConfig {
    ports: Vec<u32>,
    vote_duration: VoteDurationFile,
    timeout: TimeoutFile,
}

#[derive(Debug, Deserialize)]
struct VoteDurationFile {
    min: u64,
    max: u64,
}

#[derive(Debug, Deserialize)]
struct TimeoutFile {
    leader: LeaderTimeoutFile,
    follower: FollowerTimeoutFile,
    response: u64,
}

#[derive(Debug, Deserialize)]
struct LeaderTimeoutFile {
    heartbeat: u64,
}

#[derive(Debug, Deserialize)]
struct FollowerTimeoutFile {
    leader_heartbeat: u64,
}

/// Fully resolved configuration for one replica process.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Friendly name used only in logs.
    pub name: String,
    /// This replica's own listen port; doubles as its identity on the wire.
    pub server_port: u32,
    /// Listen ports of every other replica in the cluster.
    pub other_ports: Vec<u32>,
    /// Lower bound of the randomized election timeout.
    pub vote_duration_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub vote_duration_max: Duration,
    /// Fixed period on which a leader sends heartbeats/replication rounds.
    pub leader_heartbeat_duration: Duration,
    /// How long a follower waits without hearing from a leader before
    /// converting to Candidate.
    pub follower_heartbeat_waiting: Duration,
    /// Per-request timeout applied to outbound peer RPCs.
    pub response_timeout: Duration,
    /// If set, this replica starts directly in the Leader role. Used only
    /// to seed tests and single-node bring-up; never set in production.
    pub leader_on_start: bool,
}

impl ReplicaConfig {
    /// Load the shared cluster file at `path` and layer this process's
    /// identity from the environment on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: FileConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

        let port_str = std::env::var(ENV_PORT)
            .with_context(|| format!("{} must be set", ENV_PORT))?;
        let server_port: u32 = port_str
            .parse()
            .with_context(|| format!("{} is not a valid port: {}", ENV_PORT, port_str))?;
        let name = std::env::var(ENV_NAME).unwrap_or_else(|_| server_port.to_string());
        let leader_on_start = std::env::var(ENV_LEADER_ON_START).is_ok();

        let other_ports: Vec<u32> = file
            .ports
            .iter()
            .copied()
            .filter(|p| *p != server_port)
            .collect();

        if other_ports.len() == file.ports.len() {
            bail!("server port {} not found in configured ports", server_port);
        }

        Ok(Self {
            name,
            server_port,
            other_ports,
            vote_duration_min: Duration::from_millis(file.vote_duration.min),
            vote_duration_max: Duration::from_millis(file.vote_duration.max),
            leader_heartbeat_duration: Duration::from_millis(file.timeout.leader.heartbeat),
            follower_heartbeat_waiting: Duration::from_millis(
                file.timeout.follower.leader_heartbeat,
            ),
            response_timeout: Duration::from_millis(file.timeout.response),
            leader_on_start,
        })
    }

    /// Draw a fresh randomized election timeout from
    /// `[vote_duration_min, vote_duration_max]` using the supplied RNG.
    ///
    /// Takes the generator explicitly (rather than reaching for a
    /// process-global one) so each replica's jitter is seeded independently
    /// and tests can make the draw deterministic.
    pub fn random_election_timeout(&self, rng: &mut impl Rng) -> Duration {
        let min = self.vote_duration_min.as_millis() as u64;
        let max = self.vote_duration_max.as_millis() as u64;
        if max <= min {
            return self.vote_duration_min;
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }

    /// The address other replicas use to reach this one's HTTP server.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.server_port)
    }

    /// The address used to reach a peer at `port`.
    pub fn peer_base_url(port: u32) -> String {
        format!("http://127.0.0.1:{}", port)
    }

    /// Total cluster size, including this replica.
    pub fn cluster_size(&self) -> usize {
        self.other_ports.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::io::Write;

    fn write_temp_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    const SAMPLE: &str = r#"
        ports = [8080, 8081, 8082]

        [vote_duration]
        min = 400
        max = 800

        [timeout.leader]
        heartbeat = 150

        [timeout.follower]
        leader_heartbeat = 500

        [timeout]
        response = 200
    "#;

    #[test]
    #[serial_test::serial]
    fn loads_and_splits_ports() {
        std::env::set_var(ENV_PORT, "8081");
        std::env::set_var(ENV_NAME, "r2");
        std::env::remove_var(ENV_LEADER_ON_START);

        let f = write_temp_config(SAMPLE);
        let cfg = ReplicaConfig::load(f.path()).unwrap();

        assert_eq!(cfg.server_port, 8081);
        assert_eq!(cfg.other_ports, vec![8080, 8082]);
        assert_eq!(cfg.name, "r2");
        assert!(!cfg.leader_on_start);
        assert_eq!(cfg.cluster_size(), 3);

        std::env::remove_var(ENV_PORT);
        std::env::remove_var(ENV_NAME);
    }

    #[test]
    #[serial_test::serial]
    fn rejects_port_not_in_cluster() {
        std::env::set_var(ENV_PORT, "9999");
        let f = write_temp_config(SAMPLE);
        assert!(ReplicaConfig::load(f.path()).is_err());
        std::env::remove_var(ENV_PORT);
    }

    #[test]
    fn election_timeout_stays_in_bounds() {
        let cfg = ReplicaConfig {
            name: "x".into(),
            server_port: 1,
            other_ports: vec![],
            vote_duration_min: Duration::from_millis(100),
            vote_duration_max: Duration::from_millis(200),
            leader_heartbeat_duration: Duration::from_millis(50),
            follower_heartbeat_waiting: Duration::from_millis(300),
            response_timeout: Duration::from_millis(100),
            leader_on_start: false,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let t = cfg.random_election_timeout(&mut rng);
            assert!(t >= cfg.vote_duration_min && t <= cfg.vote_duration_max);
        }
    }
}
