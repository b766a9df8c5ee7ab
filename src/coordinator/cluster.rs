//! Cluster facade
//!
//! Owns one node's view of the cluster: the ring, the replication
//! coordinator, the synchronizer and the backup manager, all sharing the
//! same transport and clock. Several clusters can coexist in one process.

use crate::common::{BackupConfig, Clock, ClusterConfig, Error, HashRing, Result, SystemClock};
use crate::coordinator::oplog::OperationLog;
use crate::coordinator::replication::{Consistency, ReplicationCoordinator};
use crate::coordinator::transport::{LocalTransport, Transport};
use crate::ops::{
    copy_to_owners, drop_non_owners, verify_cluster, BackupManager, BackupSummary,
    RebalanceReport, SweepReport, Synchronizer, VerifyReport,
};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;

/// Client id recorded when the caller does not supply one
pub const DEFAULT_CLIENT_ID: &str = "anonymous";

pub struct ClusterBuilder {
    node_id: String,
    cluster: ClusterConfig,
    backup: BackupConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    oplog_path: Option<PathBuf>,
}

impl ClusterBuilder {
    pub fn cluster_config(mut self, config: ClusterConfig) -> Self {
        self.cluster = config;
        self
    }

    pub fn backup_config(mut self, config: BackupConfig) -> Self {
        self.backup = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Mirror the operation log to a JSON-lines file
    pub fn oplog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.oplog_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Cluster> {
        if self.cluster.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LocalTransport::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ring = Arc::new(RwLock::new(HashRing::new(
            self.cluster.virtual_nodes_per_node,
        )));
        let oplog = Arc::new(match &self.oplog_path {
            Some(path) => OperationLog::with_file(self.cluster.oplog_capacity, path)?,
            None => OperationLog::new(self.cluster.oplog_capacity),
        });

        let coordinator = ReplicationCoordinator::new(
            self.node_id.clone(),
            ring.clone(),
            transport.clone(),
            clock.clone(),
            oplog.clone(),
            self.cluster.replication_factor,
            self.cluster.operation_timeout(),
        );
        let synchronizer = Arc::new(Synchronizer::new(
            transport.clone(),
            ring.clone(),
            clock.clone(),
            self.cluster.replication_factor,
            std::time::Duration::from_secs(self.cluster.tombstone_grace_secs),
        ));
        let backups = BackupManager::new(
            self.node_id.clone(),
            transport.clone(),
            ring.clone(),
            clock,
            self.backup.retention_days,
            self.backup.dir.clone(),
        )?;

        Ok(Cluster {
            node_id: self.node_id,
            config: self.cluster,
            ring,
            transport,
            oplog,
            coordinator,
            synchronizer,
            backups,
            membership: tokio::sync::Mutex::new(()),
        })
    }
}

pub struct Cluster {
    node_id: String,
    config: ClusterConfig,
    ring: Arc<RwLock<HashRing>>,
    transport: Arc<dyn Transport>,
    oplog: Arc<OperationLog>,
    coordinator: ReplicationCoordinator,
    synchronizer: Arc<Synchronizer>,
    backups: BackupManager,
    /// Serializes membership changes; ring reads never take it
    membership: tokio::sync::Mutex<()>,
}

impl Cluster {
    pub fn builder(node_id: impl Into<String>) -> ClusterBuilder {
        ClusterBuilder {
            node_id: node_id.into(),
            cluster: ClusterConfig::default(),
            backup: BackupConfig::default(),
            transport: None,
            clock: None,
            oplog_path: None,
        }
    }

    /// In-process cluster over `nodes`, backed by memory stores
    pub fn in_memory(nodes: &[&str], config: ClusterConfig) -> Result<Self> {
        let first = nodes.first().copied().unwrap_or("node-1");
        let cluster = Self::builder(first).cluster_config(config).build()?;
        let members: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
        cluster.bootstrap(&members)?;
        Ok(cluster)
    }

    /// Register the initial members. Nothing is moved: stores are assumed to
    /// already hold what the ring assigns them (empty at first start).
    pub fn bootstrap(&self, members: &[String]) -> Result<()> {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        for node in members {
            self.transport.attach(node)?;
            ring.add_node(node);
        }
        tracing::info!("Cluster bootstrapped with {} nodes", ring.node_count());
        Ok(())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &ReplicationCoordinator {
        &self.coordinator
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    pub fn oplog(&self) -> &Arc<OperationLog> {
        &self.oplog
    }

    // === Store ===

    pub async fn put(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        consistency: Consistency,
    ) -> Result<()> {
        self.coordinator
            .put(key, value.into(), consistency, DEFAULT_CLIENT_ID)
            .await
            .map(|_| ())
    }

    pub async fn get(&self, key: &str, consistency: Consistency) -> Result<Vec<u8>> {
        let entry = self
            .coordinator
            .get(key, consistency, DEFAULT_CLIENT_ID)
            .await?;
        entry
            .value
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub async fn delete(&self, key: &str, consistency: Consistency) -> Result<()> {
        self.coordinator
            .delete(key, consistency, DEFAULT_CLIENT_ID)
            .await
            .map(|_| ())
    }

    // === Membership ===

    pub fn nodes(&self) -> Vec<String> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.nodes().map(String::from).collect()
    }

    pub fn replicas_for(&self, key: &str) -> Result<Vec<String>> {
        self.coordinator.replica_set(key)
    }

    /// Join `node_id` and move the keys it now owns onto it. Adding a
    /// present node is a no-op.
    pub async fn add_node(&self, node_id: &str) -> Result<RebalanceReport> {
        let _guard = self.membership.lock().await;
        let mut next = self.ring_snapshot();
        if next.contains(node_id) {
            return Ok(RebalanceReport::default());
        }

        self.transport.attach(node_id)?;
        next.add_node(node_id);
        let nodes: Vec<String> = next.nodes().map(String::from).collect();

        let mut report =
            copy_to_owners(&*self.transport, &next, self.config.replication_factor, &nodes)
                .await?;
        self.install(next.clone());
        report.dropped = self.drop_stale(&next, &nodes, &report).await?;

        tracing::info!(
            "Node {} joined: {} keys, {} copied, {} dropped",
            node_id,
            report.keys,
            report.copied,
            report.dropped
        );
        Ok(report)
    }

    /// Migrate data off `node_id`, remove it from the ring and detach it.
    pub async fn remove_node(&self, node_id: &str) -> Result<RebalanceReport> {
        let _guard = self.membership.lock().await;
        let mut next = self.ring_snapshot();
        if !next.remove_node(node_id) {
            return Err(Error::UnknownNode(node_id.to_string()));
        }

        let remaining: Vec<String> = next.nodes().map(String::from).collect();
        let mut sources = remaining.clone();
        sources.push(node_id.to_string());

        let mut report =
            copy_to_owners(&*self.transport, &next, self.config.replication_factor, &sources)
                .await?;
        self.install(next.clone());
        report.dropped = self.drop_stale(&next, &remaining, &report).await?;

        self.transport.detach(node_id)?;
        self.synchronizer.forget(node_id);

        if remaining.is_empty() {
            tracing::warn!("Node {} left: ring is now empty", node_id);
        } else {
            tracing::info!(
                "Node {} left: {} keys, {} copied, {} dropped",
                node_id,
                report.keys,
                report.copied,
                report.dropped
            );
        }
        Ok(report)
    }

    fn ring_snapshot(&self) -> HashRing {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, ring: HashRing) {
        *self.ring.write().unwrap_or_else(PoisonError::into_inner) = ring;
    }

    /// Drop keys from nodes that lost ownership, unless some copy failed
    async fn drop_stale(
        &self,
        ring: &HashRing,
        nodes: &[String],
        report: &RebalanceReport,
    ) -> Result<usize> {
        if report.failed > 0 {
            tracing::warn!(
                "{} copies failed during rebalance; keeping stale replicas for the synchronizer",
                report.failed
            );
            return Ok(0);
        }
        drop_non_owners(&*self.transport, ring, self.config.replication_factor, nodes).await
    }

    // === Backups ===

    pub async fn create_backup(&self) -> Result<String> {
        self.backups.create_backup().await
    }

    pub async fn restore_backup(&self, backup_id: &str) -> Result<()> {
        let _guard = self.membership.lock().await;
        self.backups.restore_backup(backup_id).await?;
        // Stores were rewound; versions observed before the restore no longer apply
        self.synchronizer.reset();
        Ok(())
    }

    pub fn list_backups(&self) -> Vec<BackupSummary> {
        self.backups.list_backups()
    }

    // === Sync & diagnostics ===

    pub async fn sync_once(&self) -> Result<SweepReport> {
        self.synchronizer.run_sweep().await
    }

    pub fn spawn_sync_task(&self) -> JoinHandle<()> {
        self.synchronizer.clone().spawn(self.config.sync_interval())
    }

    pub async fn verify(&self) -> Result<VerifyReport> {
        let ring = self.ring_snapshot();
        verify_cluster(&*self.transport, &ring, self.config.replication_factor).await
    }
}
