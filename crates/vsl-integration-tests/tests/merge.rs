//! Group merges between agents on one network.

use std::sync::Arc;

use vsl_core::Storage;
use vsl_integration_tests::{init_test_tracing, Cluster, GatedTransport};
use vsl_sync::{AgentInfo, GroupSyncCoordinator, HandshakeData, SyncConfig, Transport};

async fn connected_ids(cluster: &Cluster, agent: &str) -> Vec<String> {
    use vsl_sync::AgentRegistry;
    let mut ids: Vec<String> = cluster
        .network
        .registry(agent)
        .connected_agent_infos()
        .await
        .into_iter()
        .map(|info| info.agent_id)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn two_single_agent_groups_merge() {
    init_test_tracing();
    let cluster = Cluster::new(&["k1", "k2"]).await.unwrap();

    cluster.node("k1").sync().run_once().await;

    assert_eq!(connected_ids(&cluster, "k1").await, vec!["k2"]);
    assert_eq!(connected_ids(&cluster, "k2").await, vec!["k1"]);

    let fingerprints = cluster.fingerprints().await;
    assert!(fingerprints[0].is_some());
    assert_eq!(fingerprints[0], fingerprints[1]);

    // each side pulled the other's snapshot
    for (agent, other) in [("k1", "k2"), ("k2", "k1")] {
        let replica = cluster.node(agent).storage().current_hash(other).await.unwrap();
        let own = cluster.node(other).storage().current_hash(other).await.unwrap();
        assert_eq!(replica, own);
    }

    let k1 = cluster.node("k1").sync().stats().await;
    let k2 = cluster.node("k2").sync().stats().await;
    assert_eq!(k1.handshakes_completed, 1);
    assert_eq!(k2.handshakes_completed, 1);
}

#[tokio::test]
async fn larger_side_does_not_initiate() {
    let cluster = Cluster::new(&["k1", "k2"]).await.unwrap();
    cluster.node("k2").sync().run_once().await;
    assert!(connected_ids(&cluster, "k2").await.is_empty());
    assert!(cluster.fingerprints().await.iter().all(Option::is_none));
}

#[tokio::test]
async fn single_agent_joins_existing_group() {
    let cluster = Cluster::new(&["k1", "k2", "k3"]).await.unwrap();

    // k2 and k3 merge first; k2 is the smaller name of the pair
    cluster.node("k2").sync().run_once().await;
    assert_eq!(connected_ids(&cluster, "k2").await, vec!["k3"]);
    assert!(cluster.node("k2").sync().group_key_fingerprint().await.is_some());

    // k1 is alone, the {k2, k3} group is larger, so k1 initiates
    cluster.node("k1").sync().run_once().await;

    for agent in ["k1", "k2", "k3"] {
        assert_eq!(connected_ids(&cluster, agent).await.len(), 2, "{agent}");
    }
    let fingerprints = cluster.fingerprints().await;
    assert!(fingerprints.iter().all(|f| f.is_some() && *f == fingerprints[0]));

    // k3 received k1's snapshot forwarded by k2
    let k1_hash = cluster.node("k1").storage().current_hash("k1").await.unwrap();
    assert_eq!(cluster.node("k3").storage().current_hash("k1").await.unwrap(), k1_hash);
}

#[tokio::test]
async fn unreachable_member_gets_key_on_redelivery() {
    let cluster = Cluster::new(&["k1", "k2", "k3"]).await.unwrap();
    cluster.node("k2").sync().run_once().await;
    let old_key = cluster.node("k3").sync().group_key_fingerprint().await;

    cluster.network.set_reachable("k3", false).await;
    cluster.node("k1").sync().run_once().await;

    let new_key = cluster.node("k1").sync().group_key_fingerprint().await;
    assert_ne!(new_key, old_key);
    assert_eq!(cluster.node("k3").sync().group_key_fingerprint().await, old_key);
    assert_eq!(cluster.node("k2").sync().stats().await.pending_key_deliveries, 1);

    cluster.network.set_reachable("k3", true).await;
    cluster.node("k2").sync().run_once().await;
    assert_eq!(cluster.node("k3").sync().group_key_fingerprint().await, new_key);
    assert_eq!(cluster.node("k2").sync().stats().await.pending_key_deliveries, 0);

    // k3 missed k1's snapshot too and recovers it by hash check
    let k1_hash = cluster.node("k1").storage().current_hash("k1").await.unwrap();
    assert!(cluster.node("k3").sync().check_remote_hash("k1", &k1_hash).await.unwrap());
    assert_eq!(cluster.node("k3").storage().current_hash("k1").await.unwrap(), k1_hash);
}

#[tokio::test]
async fn concurrent_handshakes_toward_one_agent() {
    let cluster = Cluster::new(&["k1", "k2", "k3"]).await.unwrap();
    let network = cluster.network.clone();

    // a responder whose snapshot pulls block until released
    let gated = Arc::new(GatedTransport::new(network.transport("r")));
    let responder = Arc::new(GroupSyncCoordinator::new(
        "r",
        Arc::new(vsl_core::MemoryStore::new("r")),
        Arc::clone(&gated) as Arc<dyn Transport>,
        network.registry("r"),
        SyncConfig::default(),
    ));
    network.attach(&responder).await.unwrap();

    let request = |agent: &str| HandshakeData::request(vec![AgentInfo::new(agent, "unknown")]);
    let first = {
        let responder = Arc::clone(&responder);
        let request = request("k1");
        tokio::spawn(async move { responder.handle_handshake_request(request).await })
    };
    gated.entered.notified().await;

    let second = responder.handle_handshake_request(request("k2")).await.unwrap();
    let third = responder.handle_handshake_request(request("k3")).await.unwrap();
    assert!(second.is_none());
    assert!(third.is_none());

    gated.release.notify_one();
    let reply = first.await.unwrap().unwrap().unwrap();
    assert!(reply.group_key().is_some());

    let stats = responder.stats().await;
    assert_eq!(stats.handshakes_completed, 1);
    assert_eq!(stats.handshakes_deferred, 2);
    assert_eq!(network.group_of("r").await, vec!["k1", "r"]);
}
