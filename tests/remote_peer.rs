//! Two processes' worth of nodes talking over the internal HTTP API

use ringkv::common::PeerConfig;
use ringkv::coordinator::http::create_router;
use ringkv::coordinator::Transport;
use ringkv::coordinator::LocalTransport;
use ringkv::{Config, Consistency, Entry, NodeServer};
use std::sync::Arc;
use std::time::Duration;

/// Serve nodes `b` and `c` on an ephemeral port; returns the base URL.
async fn spawn_remote() -> (String, Arc<LocalTransport>) {
    let config = Config {
        node_id: "b".into(),
        local_nodes: vec!["c".into()],
        ..Default::default()
    };
    let state = NodeServer::new(config).build_state().unwrap();
    let local = state.local.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    (format!("http://{}", addr), local)
}

/// Replica writes beyond the quorum finish in the background; poll for them.
async fn wait_for_remote<F>(remote: &LocalTransport, key: &str, done: F)
where
    F: Fn(Option<&Entry>) -> bool,
{
    for _ in 0..100 {
        let mut all = true;
        for node in ["b", "c"] {
            let entry = remote.get_entry(node, key).await.unwrap();
            all &= done(entry.as_ref());
        }
        if all {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("remote replicas never caught up on {}", key);
}

#[tokio::test]
async fn test_replicates_to_remote_nodes() {
    let (url, remote) = spawn_remote().await;
    let config = Config {
        node_id: "a".into(),
        peers: vec![
            PeerConfig {
                id: "b".into(),
                addr: url.clone(),
            },
            PeerConfig {
                id: "c".into(),
                addr: url,
            },
        ],
        ..Default::default()
    };
    let state = NodeServer::new(config).build_state().unwrap();
    let cluster = state.cluster.clone();
    assert_eq!(cluster.nodes(), vec!["a", "b", "c"]);

    cluster
        .put("a key/with slash", "hello", Consistency::Strong)
        .await
        .unwrap();
    assert_eq!(
        cluster
            .get("a key/with slash", Consistency::Strong)
            .await
            .unwrap(),
        b"hello"
    );

    // rf=3 over three nodes: both remote stores end up with the entry
    wait_for_remote(&remote, "a key/with slash", |e| {
        e.and_then(|e| e.value()) == Some(&b"hello"[..])
    })
    .await;

    let report = cluster.sync_once().await.unwrap();
    assert_eq!(report.pairs_failed, 0);
    assert_eq!(report.changes(), 0);

    let id = cluster.create_backup().await.unwrap();
    cluster.delete("a key/with slash", Consistency::Strong).await.unwrap();
    wait_for_remote(&remote, "a key/with slash", |e| e.is_some_and(Entry::is_tombstone)).await;
    cluster.restore_backup(&id).await.unwrap();
    assert_eq!(
        cluster
            .get("a key/with slash", Consistency::Eventual)
            .await
            .unwrap(),
        b"hello"
    );
}

#[tokio::test]
async fn test_unknown_remote_node_is_unreachable() {
    let (url, _) = spawn_remote().await;
    let config = Config {
        node_id: "a".into(),
        peers: vec![PeerConfig {
            id: "ghost".into(),
            addr: url,
        }],
        ..Default::default()
    };
    let state = NodeServer::new(config).build_state().unwrap();
    let transport = state.peers.clone().unwrap();
    let err = transport.get_entry("ghost", "k").await.unwrap_err();
    assert_eq!(err.kind(), "unknown_node");
}
