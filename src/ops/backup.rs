//! Point-in-time backups of every node store
//!
//! A backup is an immutable per-node copy of all entries tagged with one
//! timestamp. Writers are never blocked: each node's sub-snapshot is
//! consistent on its own, the union across nodes is only approximately
//! point-in-time.
//!
//! On-disk format (when a backup directory is configured): one
//! `<backup_id>.bak` file holding the bincode-encoded `Backup` followed by a
//! little-endian CRC32 of that payload.

use crate::common::{Clock, Error, HashRing, Result};
use crate::coordinator::transport::Transport;
use crate::node::Entry;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

const BACKUP_EXT: &str = "bak";
const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub node_count: usize,
    pub key_count: usize,
    /// Node that took the backup
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// node id → entries, ordered by key
    pub snapshots: BTreeMap<String, Vec<Entry>>,
    pub metadata: BackupMetadata,
}

impl Backup {
    pub fn created_at(&self) -> DateTime<Utc> {
        to_datetime(self.timestamp)
    }

    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            backup_id: self.backup_id.clone(),
            created_at: self.created_at(),
            node_count: self.metadata.node_count,
            key_count: self.metadata.key_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub node_count: usize,
    pub key_count: usize,
}

fn to_datetime(timestamp: f64) -> DateTime<Utc> {
    let millis = (timestamp * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

pub struct BackupManager {
    node_id: String,
    transport: Arc<dyn Transport>,
    ring: Arc<RwLock<HashRing>>,
    clock: Arc<dyn Clock>,
    retention_days: u64,
    dir: Option<PathBuf>,
    backups: RwLock<BTreeMap<String, Arc<Backup>>>,
}

impl BackupManager {
    /// Create a manager; when `dir` is set, previously persisted backups are loaded.
    pub fn new(
        node_id: String,
        transport: Arc<dyn Transport>,
        ring: Arc<RwLock<HashRing>>,
        clock: Arc<dyn Clock>,
        retention_days: u64,
        dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut backups = BTreeMap::new();
        if let Some(dir) = &dir {
            std::fs::create_dir_all(dir)?;
            for item in std::fs::read_dir(dir)? {
                let path = item?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BACKUP_EXT) {
                    continue;
                }
                match read_backup(&path) {
                    Ok(backup) => {
                        backups.insert(backup.backup_id.clone(), Arc::new(backup));
                    }
                    Err(e) => tracing::warn!("Skipping backup {}: {}", path.display(), e),
                }
            }
            tracing::info!("Loaded {} backups from {}", backups.len(), dir.display());
        }

        Ok(Self {
            node_id,
            transport,
            ring,
            clock,
            retention_days,
            dir,
            backups: RwLock::new(backups),
        })
    }

    /// Snapshot every node in the ring. Prunes expired backups first.
    pub async fn create_backup(&self) -> Result<String> {
        let now = self.clock.now();
        self.prune(now)?;

        let nodes: Vec<String> = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            ring.nodes().map(String::from).collect()
        };
        if nodes.is_empty() {
            return Err(Error::EmptyRing);
        }

        let mut snapshots = BTreeMap::new();
        let mut key_count = 0;
        for node in &nodes {
            let entries = self.transport.entries(node).await?;
            key_count += entries.len();
            snapshots.insert(node.clone(), entries);
        }

        let backup_id = format!(
            "backup-{}-{}",
            to_datetime(now).format("%Y%m%dT%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let backup = Backup {
            backup_id: backup_id.clone(),
            timestamp: now,
            snapshots,
            metadata: BackupMetadata {
                node_count: nodes.len(),
                key_count,
                created_by: self.node_id.clone(),
            },
        };

        if let Some(dir) = &self.dir {
            write_backup(&backup_path(dir, &backup_id), &backup)?;
        }
        self.backups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(backup_id.clone(), Arc::new(backup));

        tracing::info!(
            "Created backup {} ({} nodes, {} entries)",
            backup_id,
            nodes.len(),
            key_count
        );
        Ok(backup_id)
    }

    /// Replace every node's contents with the snapshot.
    ///
    /// All-or-nothing: current contents are staged first, and if any node
    /// fails mid-restore the nodes already restored are rolled back.
    /// Ring members absent from the backup are emptied.
    pub async fn restore_backup(&self, backup_id: &str) -> Result<()> {
        let backup = self
            .get(backup_id)
            .ok_or_else(|| Error::UnknownBackupId(backup_id.to_string()))?;

        let nodes: Vec<String> = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            ring.nodes().map(String::from).collect()
        };
        if let Some(missing) = backup.snapshots.keys().find(|n| !nodes.contains(n)) {
            return Err(Error::RestoreFailed(format!(
                "node {} from backup {} is not in the cluster",
                missing, backup_id
            )));
        }

        // Stage current state for rollback
        let mut prior: Vec<(String, Vec<Entry>)> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let entries = self.transport.entries(node).await.map_err(|e| {
                Error::RestoreFailed(format!("cannot stage node {}: {}", node, e))
            })?;
            prior.push((node.clone(), entries));
        }

        let mut restored: Vec<&(String, Vec<Entry>)> = Vec::with_capacity(prior.len());
        for staged in &prior {
            let node = &staged.0;
            let entries = backup.snapshots.get(node).cloned().unwrap_or_default();
            if let Err(e) = self.transport.replace_entries(node, entries).await {
                tracing::warn!(
                    "Restore of {} failed on {}: {}; rolling back",
                    backup_id,
                    node,
                    e
                );
                for (done, previous) in restored {
                    if let Err(e) = self.transport.replace_entries(done, previous.clone()).await {
                        tracing::error!("Rollback of {} failed: {}", done, e);
                    }
                }
                return Err(Error::RestoreFailed(format!("node {}: {}", node, e)));
            }
            restored.push(staged);
        }

        tracing::info!("Restored backup {} to {} nodes", backup_id, nodes.len());
        Ok(())
    }

    pub fn get(&self, backup_id: &str) -> Option<Arc<Backup>> {
        self.backups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(backup_id)
            .cloned()
    }

    /// Summaries, oldest first
    pub fn list_backups(&self) -> Vec<BackupSummary> {
        let backups = self.backups.read().unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<_> = backups.values().map(|b| b.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Drop backups older than the retention window. Returns how many were removed.
    pub fn prune(&self, now: f64) -> Result<usize> {
        let cutoff = now - self.retention_days as f64 * SECS_PER_DAY;
        let mut backups = self.backups.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = backups
            .values()
            .filter(|b| b.timestamp < cutoff)
            .map(|b| b.backup_id.clone())
            .collect();

        for id in &expired {
            backups.remove(id);
            if let Some(dir) = &self.dir {
                let path = backup_path(dir, id);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
            tracing::info!("Pruned expired backup {}", id);
        }
        Ok(expired.len())
    }
}

fn backup_path(dir: &Path, backup_id: &str) -> PathBuf {
    dir.join(format!("{}.{}", backup_id, BACKUP_EXT))
}

fn write_backup(path: &Path, backup: &Backup) -> Result<()> {
    let mut payload = bincode::serialize(backup)?;
    let checksum = crc32fast::hash(&payload);
    payload.extend_from_slice(&checksum.to_le_bytes());

    // Write then rename so a crash never leaves a torn file under the final name
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &payload)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_backup(path: &Path) -> Result<Backup> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 4 {
        return Err(Error::Internal(format!("{} is truncated", path.display())));
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - 4);
    let mut expected = [0u8; 4];
    expected.copy_from_slice(trailer);
    let expected = u32::from_le_bytes(expected);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::coordinator::transport::LocalTransport;

    struct Fixture {
        transport: Arc<LocalTransport>,
        ring: Arc<RwLock<HashRing>>,
        clock: Arc<ManualClock>,
    }

    fn fixture(nodes: &[&str]) -> Fixture {
        let transport = Arc::new(LocalTransport::new());
        let mut ring = HashRing::new(20);
        for node in nodes {
            transport.attach(node).unwrap();
            ring.add_node(node);
        }
        Fixture {
            transport,
            ring: Arc::new(RwLock::new(ring)),
            clock: Arc::new(ManualClock::new(1_700_000_000.0)),
        }
    }

    fn manager(f: &Fixture, dir: Option<PathBuf>) -> BackupManager {
        BackupManager::new(
            "a".into(),
            f.transport.clone(),
            f.ring.clone(),
            f.clock.clone(),
            7,
            dir,
        )
        .unwrap()
    }

    async fn put(f: &Fixture, node: &str, key: &str, value: &[u8], version: u64) {
        let entry = Entry::new(key, value.to_vec(), f.clock.now(), version);
        f.transport.put_entry(node, entry).await.unwrap();
    }

    async fn value(f: &Fixture, node: &str, key: &str) -> Option<Vec<u8>> {
        f.transport
            .get_entry(node, key)
            .await
            .unwrap()
            .and_then(|e| e.value)
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let f = fixture(&["a", "b"]);
        let backups = manager(&f, None);
        put(&f, "a", "k1", b"v1", 1).await;
        put(&f, "b", "k1", b"v1", 1).await;

        let id = backups.create_backup().await.unwrap();
        let backup = backups.get(&id).unwrap();
        assert_eq!(backup.metadata.node_count, 2);
        assert_eq!(backup.metadata.key_count, 2);

        put(&f, "a", "k1", b"changed", 2).await;
        put(&f, "b", "k2", b"new", 1).await;

        backups.restore_backup(&id).await.unwrap();
        assert_eq!(value(&f, "a", "k1").await, Some(b"v1".to_vec()));
        assert_eq!(value(&f, "b", "k2").await, None);

        // Restoring again lands in the same state
        backups.restore_backup(&id).await.unwrap();
        assert_eq!(f.transport.entries("a").await.unwrap(), backup.snapshots["a"]);
        assert_eq!(f.transport.entries("b").await.unwrap(), backup.snapshots["b"]);
    }

    #[tokio::test]
    async fn test_restore_unknown_id() {
        let f = fixture(&["a"]);
        let backups = manager(&f, None);
        assert!(matches!(
            backups.restore_backup("nope").await,
            Err(Error::UnknownBackupId(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_of_empty_ring_fails() {
        let f = fixture(&[]);
        let backups = manager(&f, None);
        assert!(matches!(backups.create_backup().await, Err(Error::EmptyRing)));
    }

    #[tokio::test]
    async fn test_restore_empties_nodes_missing_from_backup() {
        let f = fixture(&["a"]);
        let backups = manager(&f, None);
        put(&f, "a", "k", b"v", 1).await;
        let id = backups.create_backup().await.unwrap();

        f.transport.attach("b").unwrap();
        f.ring.write().unwrap().add_node("b");
        put(&f, "b", "k", b"v", 1).await;

        backups.restore_backup(&id).await.unwrap();
        assert!(f.transport.entries("b").await.unwrap().is_empty());
        assert_eq!(value(&f, "a", "k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_restore_fails_when_node_left() {
        let f = fixture(&["a", "b"]);
        let backups = manager(&f, None);
        let id = backups.create_backup().await.unwrap();

        f.ring.write().unwrap().remove_node("b");
        assert!(matches!(
            backups.restore_backup(&id).await,
            Err(Error::RestoreFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_leaves_state_untouched_on_unreachable_node() {
        let f = fixture(&["a", "b"]);
        let backups = manager(&f, None);
        put(&f, "a", "k", b"old", 1).await;
        let id = backups.create_backup().await.unwrap();
        put(&f, "a", "k", b"new", 2).await;

        f.transport.set_reachable("b", false);
        assert!(matches!(
            backups.restore_backup(&id).await,
            Err(Error::RestoreFailed(_))
        ));
        assert_eq!(value(&f, "a", "k").await, Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_retention_prunes_old_backups() {
        let f = fixture(&["a"]);
        let backups = manager(&f, None);
        let old = backups.create_backup().await.unwrap();

        f.clock.advance(8.0 * SECS_PER_DAY);
        let fresh = backups.create_backup().await.unwrap();

        let ids: Vec<_> = backups
            .list_backups()
            .into_iter()
            .map(|s| s.backup_id)
            .collect();
        assert_eq!(ids, vec![fresh]);
        assert!(backups.get(&old).is_none());
    }

    #[tokio::test]
    async fn test_backups_persist_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&["a", "b"]);
        put(&f, "a", "k", b"v", 1).await;

        let id = manager(&f, Some(dir.path().to_path_buf()))
            .create_backup()
            .await
            .unwrap();
        assert!(dir.path().join(format!("{}.bak", id)).exists());

        let reloaded = manager(&f, Some(dir.path().to_path_buf()));
        let summaries = reloaded.list_backups();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].backup_id, id);
        assert_eq!(summaries[0].key_count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_backup_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(&["a"]);
        put(&f, "a", "k", b"v", 1).await;
        let id = manager(&f, Some(dir.path().to_path_buf()))
            .create_backup()
            .await
            .unwrap();

        let path = dir.path().join(format!("{}.bak", id));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_backup(&path),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert!(manager(&f, Some(dir.path().to_path_buf()))
            .list_backups()
            .is_empty());
    }
}
