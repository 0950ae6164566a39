//! End-to-end tests against a real three-replica cluster: each replica is
//! a genuine `ConsensusEngine` behind a genuine axum server bound to a
//! loopback port, talking over real HTTP. Timers are configured short so
//! the whole suite converges in well under a second.

use std::sync::Arc;
use std::time::Duration;

use raftkv::config::ReplicaConfig;
use raftkv::consensus::{Command, ConsensusEngine, LogEntry, RoleTag};

fn cluster_config(port: u32, other_ports: Vec<u32>) -> ReplicaConfig {
    ReplicaConfig {
        name: port.to_string(),
        server_port: port,
        other_ports,
        vote_duration_min: Duration::from_millis(40),
        vote_duration_max: Duration::from_millis(80),
        leader_heartbeat_duration: Duration::from_millis(20),
        follower_heartbeat_waiting: Duration::from_millis(120),
        response_timeout: Duration::from_millis(200),
        leader_on_start: false,
    }
}

/// Spin up a 3-node cluster starting at `base_port`, with background
/// election/heartbeat loops and HTTP servers already running.
async fn spawn_cluster(base_port: u32) -> Vec<Arc<ConsensusEngine>> {
    let ports = [base_port, base_port + 1, base_port + 2];
    let mut engines = Vec::new();
    for (i, &port) in ports.iter().enumerate() {
        let others = ports
            .iter()
            .copied()
            .filter(|&p| p != port)
            .collect::<Vec<_>>();
        let engine = Arc::new(
            ConsensusEngine::new(cluster_config(port, others), 1000 + i as u64).unwrap(),
        );
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_election_loop().await }
        });
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_heartbeat_loop().await }
        });
        tokio::spawn(raftkv::server::run(engine.clone()));
        engines.push(engine);
    }
    // Give the listeners a moment to bind before anyone dials them.
    tokio::time::sleep(Duration::from_millis(20)).await;
    engines
}

async fn wait_for_leader(engines: &[Arc<ConsensusEngine>]) -> Arc<ConsensusEngine> {
    for _ in 0..100 {
        for engine in engines {
            if engine.meta().role == RoleTag::Leader {
                return engine.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no leader elected within timeout");
}

#[tokio::test]
async fn election_converges_to_a_single_leader() {
    let engines = spawn_cluster(19100).await;
    let _leader = wait_for_leader(&engines).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let leader_count = engines
        .iter()
        .filter(|e| e.meta().role == RoleTag::Leader)
        .count();
    assert_eq!(leader_count, 1, "exactly one replica must be leader");
}

#[tokio::test]
async fn proposal_commits_and_replicates_to_followers() {
    let engines = spawn_cluster(19200).await;
    let leader = wait_for_leader(&engines).await;

    leader
        .propose(LogEntry {
            term: 0,
            command: Command::Create,
            key: "hello".into(),
            value: Some("world".into()),
            compare_value: None,
        })
        .await
        .expect("majority of peers should ack the proposal");

    assert_eq!(leader.store().get("hello").unwrap(), "world");

    // Give the next heartbeat round time to carry the commit index to
    // followers so they apply it too.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let replicated = engines
        .iter()
        .filter(|e| e.store().get("hello").as_deref() == Ok("world"))
        .count();
    assert_eq!(replicated, engines.len(), "every replica should converge");
}

#[tokio::test]
async fn cas_rejects_mismatched_expected_value() {
    let engines = spawn_cluster(19300).await;
    let leader = wait_for_leader(&engines).await;

    leader
        .propose(LogEntry {
            term: 0,
            command: Command::Create,
            key: "k".into(),
            value: Some("1".into()),
            compare_value: None,
        })
        .await
        .unwrap();

    assert!(leader.store().validate_cas("k", "wrong-expected").is_err());
    assert!(leader.store().validate_cas("k", "1").is_ok());
}
