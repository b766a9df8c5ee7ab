//! Integration tests for ringkv

use ringkv::coordinator::{LocalTransport, Transport};
use ringkv::{Cluster, ClusterConfig, Consistency, Entry, Error, NodeStore};
use std::sync::Arc;

fn cluster_with(nodes: &[&str], replication_factor: usize) -> (Cluster, Arc<LocalTransport>) {
    let local = Arc::new(LocalTransport::new());
    let config = ClusterConfig {
        replication_factor,
        virtual_nodes_per_node: 100,
        operation_timeout_ms: 500,
        ..Default::default()
    };
    let cluster = Cluster::builder(nodes[0])
        .cluster_config(config)
        .transport(local.clone())
        .build()
        .unwrap();
    let members: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
    cluster.bootstrap(&members).unwrap();
    (cluster, local)
}

#[tokio::test]
async fn test_basic_put_get() {
    let (cluster, _) = cluster_with(&["n1", "n2", "n3"], 3);
    cluster.put("a", "1", Consistency::Strong).await.unwrap();
    assert_eq!(cluster.get("a", Consistency::Strong).await.unwrap(), b"1");
}

#[tokio::test]
async fn test_quorum_failure() {
    let (cluster, local) = cluster_with(&["n1", "n2", "n3"], 3);
    local.set_reachable("n2", false);
    local.set_reachable("n3", false);

    let err = cluster.put("a", "1", Consistency::Strong).await.unwrap_err();
    assert!(matches!(err, Error::QuorumNotReached { needed: 2, got: 1 }));
    assert!(err.is_retryable());

    // One live replica is enough for an eventual write
    cluster.put("a", "1", Consistency::Eventual).await.unwrap();
    assert_eq!(cluster.get("a", Consistency::Eventual).await.unwrap(), b"1");
}

#[tokio::test]
async fn test_quorum_write_visibility() {
    let (cluster, _) = cluster_with(&["n1", "n2", "n3", "n4", "n5"], 3);
    for i in 0..50 {
        let key = format!("key-{}", i);
        cluster.put(&key, format!("v{}", i), Consistency::Strong).await.unwrap();
        assert_eq!(
            cluster.get(&key, Consistency::Strong).await.unwrap(),
            format!("v{}", i).into_bytes()
        );
    }
}

#[tokio::test]
async fn test_conflict_resolution() {
    let (cluster, local) = cluster_with(&["n1", "n2"], 2);
    local
        .put_entry("n1", Entry::new("x", b"first".to_vec(), 100.0, 1))
        .await
        .unwrap();
    local
        .put_entry("n2", Entry::new("x", b"second".to_vec(), 200.0, 1))
        .await
        .unwrap();

    let sync = cluster.synchronizer();
    sync.sync_data("n1", "n2").await.unwrap();
    sync.sync_data("n2", "n1").await.unwrap();

    for node in ["n1", "n2"] {
        let entry = local.get_entry(node, "x").await.unwrap().unwrap();
        assert_eq!(entry.value(), Some(&b"second"[..]), "on {}", node);
    }
}

#[tokio::test]
async fn test_node_removal_rebalancing() {
    let (cluster, local) = cluster_with(&["n1", "n2", "n3"], 2);
    for i in 0..100 {
        cluster
            .put(&format!("key-{}", i), format!("v{}", i), Consistency::Strong)
            .await
            .unwrap();
    }

    cluster.remove_node("n3").await.unwrap();
    assert_eq!(cluster.nodes(), vec!["n1", "n2"]);
    assert!(!local.hosts("n3"));

    for i in 0..100 {
        let key = format!("key-{}", i);
        let mut holders = 0;
        for node in ["n1", "n2"] {
            if local.get_entry(node, &key).await.unwrap().is_some() {
                holders += 1;
            }
        }
        assert_eq!(holders, 2, "{} held by {} nodes", key, holders);
        assert_eq!(
            cluster.get(&key, Consistency::Strong).await.unwrap(),
            format!("v{}", i).into_bytes()
        );
    }
}

#[tokio::test]
async fn test_node_join_rebalancing() {
    let (cluster, local) = cluster_with(&["n1", "n2", "n3"], 2);
    for i in 0..100 {
        cluster
            .put(&format!("key-{}", i), "v", Consistency::Strong)
            .await
            .unwrap();
    }

    cluster.add_node("n4").await.unwrap();
    assert!(!local.store("n4").unwrap().is_empty().unwrap());

    let report = cluster.verify().await.unwrap();
    assert_eq!(report.total_keys, 100);
    assert!(report.is_healthy(), "{:?}", report);
}

#[tokio::test]
async fn test_delete_is_not_resurrected_by_sync() {
    let (cluster, local) = cluster_with(&["n1", "n2", "n3"], 3);
    cluster.put("k", "v", Consistency::Strong).await.unwrap();

    // n3 misses the delete
    local.set_reachable("n3", false);
    cluster.delete("k", Consistency::Strong).await.unwrap();
    local.set_reachable("n3", true);

    cluster.sync_once().await.unwrap();
    for node in ["n1", "n2", "n3"] {
        let entry = local.get_entry(node, "k").await.unwrap().unwrap();
        assert!(entry.is_tombstone(), "{} still holds a live value", node);
    }
    assert!(matches!(
        cluster.get("k", Consistency::Eventual).await,
        Err(Error::KeyNotFound(_))
    ));
}
