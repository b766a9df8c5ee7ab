//! Backup and restore tests for ringkv

use ringkv::common::{BackupConfig, ManualClock};
use ringkv::coordinator::{LocalTransport, Transport};
use ringkv::{Cluster, ClusterConfig, Consistency, Error};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn cluster_at(dir: Option<&Path>, clock: Arc<ManualClock>) -> (Cluster, Arc<LocalTransport>) {
    let local = Arc::new(LocalTransport::new());
    let cluster = Cluster::builder("n1")
        .cluster_config(ClusterConfig {
            replication_factor: 2,
            virtual_nodes_per_node: 50,
            ..Default::default()
        })
        .backup_config(BackupConfig {
            retention_days: 7,
            dir: dir.map(Path::to_path_buf),
        })
        .transport(local.clone())
        .clock(clock)
        .build()
        .unwrap();
    cluster
        .bootstrap(&["n1".to_string(), "n2".to_string(), "n3".to_string()])
        .unwrap();
    (cluster, local)
}

async fn state(local: &LocalTransport) -> BTreeMap<String, Vec<(String, Option<Vec<u8>>)>> {
    let mut state = BTreeMap::new();
    for node in local.node_ids() {
        let entries = local.entries(&node).await.unwrap();
        state.insert(
            node,
            entries.into_iter().map(|e| (e.key, e.value)).collect(),
        );
    }
    state
}

#[tokio::test]
async fn test_restore_is_idempotent() {
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let (cluster, local) = cluster_at(None, clock.clone());
    for i in 0..30 {
        cluster
            .put(&format!("k{}", i), format!("v{}", i), Consistency::Strong)
            .await
            .unwrap();
    }
    let at_backup = state(&local).await;
    let id = cluster.create_backup().await.unwrap();

    clock.advance(10.0);
    cluster.put("k0", "changed", Consistency::Strong).await.unwrap();
    cluster.delete("k1", Consistency::Strong).await.unwrap();
    cluster.put("new", "x", Consistency::Strong).await.unwrap();

    cluster.restore_backup(&id).await.unwrap();
    assert_eq!(state(&local).await, at_backup);

    cluster.restore_backup(&id).await.unwrap();
    assert_eq!(state(&local).await, at_backup);
    assert_eq!(cluster.get("k0", Consistency::Strong).await.unwrap(), b"v0");
}

#[tokio::test]
async fn test_unknown_backup_id() {
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let (cluster, _) = cluster_at(None, clock);
    assert!(matches!(
        cluster.restore_backup("backup-does-not-exist").await,
        Err(Error::UnknownBackupId(_))
    ));
}

#[tokio::test]
async fn test_retention_window() {
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let (cluster, _) = cluster_at(None, clock.clone());

    let first = cluster.create_backup().await.unwrap();
    clock.advance(3.0 * 86_400.0);
    let second = cluster.create_backup().await.unwrap();
    clock.advance(5.0 * 86_400.0);
    let third = cluster.create_backup().await.unwrap();

    let ids: Vec<String> = cluster
        .list_backups()
        .into_iter()
        .map(|b| b.backup_id)
        .collect();
    assert!(!ids.contains(&first));
    assert_eq!(ids, vec![second, third]);
}

#[tokio::test]
async fn test_backups_survive_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));

    let id = {
        let (cluster, _) = cluster_at(Some(dir.path()), clock.clone());
        cluster.put("k", "persisted", Consistency::Strong).await.unwrap();
        cluster.create_backup().await.unwrap()
    };

    // Fresh stores, same backup directory
    let (cluster, _) = cluster_at(Some(dir.path()), clock);
    assert!(matches!(
        cluster.get("k", Consistency::Strong).await,
        Err(Error::KeyNotFound(_))
    ));
    cluster.restore_backup(&id).await.unwrap();
    assert_eq!(
        cluster.get("k", Consistency::Strong).await.unwrap(),
        b"persisted"
    );
}
