//! Node server

use crate::common::{Config, Error, Result};
use crate::coordinator::client::HttpTransport;
use crate::coordinator::cluster::Cluster;
use crate::coordinator::http::{create_router, AppState, MAX_BODY_BYTES};
use crate::coordinator::transport::LocalTransport;
use axum::extract::DefaultBodyLimit;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub struct NodeServer {
    config: Config,
}

impl NodeServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the cluster view this process serves. Local and peer nodes are
    /// registered without moving data.
    pub fn build_state(&self) -> Result<AppState> {
        let local = Arc::new(local_transport(self.config.data_dir.as_deref())?);
        let peers = Arc::new(HttpTransport::new(
            local.clone(),
            &self.config.peers,
            self.config.cluster.operation_timeout(),
        )?);

        let mut builder = Cluster::builder(self.config.node_id.clone())
            .cluster_config(self.config.cluster.clone())
            .backup_config(self.config.backup.clone())
            .transport(peers.clone());
        if let Some(dir) = &self.config.backup.dir {
            builder = builder.oplog_path(dir.join("oplog.jsonl"));
        }
        let cluster = builder.build()?;
        cluster.bootstrap(&self.config.initial_members())?;

        Ok(AppState {
            cluster: Arc::new(cluster),
            local,
            peers: Some(peers),
        })
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting node: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Peers: {}", self.config.peers.len());
        tracing::info!("  Local nodes: {}", self.config.local_nodes.len());
        tracing::info!(
            "  Replicas: {}",
            self.config.cluster.replication_factor
        );

        let state = self.build_state()?;
        let sync_task = state.cluster.spawn_sync_task();

        let router = create_router(state).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Node ready");

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        sync_task.abort();
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }

        tracing::info!("Node stopped");
        Ok(())
    }
}

/// Transport for the nodes hosted here: one sled database per node under
/// `data_dir`, memory stores otherwise.
fn local_transport(data_dir: Option<&Path>) -> Result<LocalTransport> {
    let Some(dir) = data_dir else {
        return Ok(LocalTransport::new());
    };
    open_stores(dir)
}

#[cfg(feature = "sled-backend")]
fn open_stores(dir: &Path) -> Result<LocalTransport> {
    use crate::node::{NodeStore, SledStore};

    std::fs::create_dir_all(dir)?;
    tracing::info!("  Data dir: {}", dir.display());
    let dir = dir.to_path_buf();
    Ok(LocalTransport::with_factory(move |node| {
        // node ids become directory names
        if node.is_empty() || node == "." || node == ".." || node.contains(['/', '\\']) {
            return Err(Error::InvalidConfig(format!(
                "node id {:?} cannot name a data directory",
                node
            )));
        }
        let store = SledStore::open(dir.join(node))?;
        Ok(Arc::new(store) as Arc<dyn NodeStore>)
    }))
}

#[cfg(not(feature = "sled-backend"))]
fn open_stores(_dir: &Path) -> Result<LocalTransport> {
    Err(Error::InvalidConfig(
        "data_dir requires the sled-backend feature".into(),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
