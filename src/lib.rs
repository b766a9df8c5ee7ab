//! # ringkv
//!
//! A leaderless, consistently-hashed replicated key-value store with:
//! - Consistent hashing with virtual nodes for placement
//! - Tunable per-request consistency (strong quorum or eventual)
//! - Tombstoned deletes and last-writer-wins anti-entropy
//! - Point-in-time backups with retention
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            client (HTTP /kv/:key)
//!                     │
//!          ┌──────────▼───────────┐
//!          │ ReplicationCoordinator│  HashRing → replica set
//!          └───┬────────┬─────┬───┘
//!              │ fan-out│     │ (quorum or first ack)
//!        ┌─────▼──┐ ┌───▼────┐ ┌▼───────┐
//!        │ node-a │ │ node-b │ │ node-c │   NodeStore per node
//!        └─────▲──┘ └───▲────┘ └▲───────┘
//!              └── Synchronizer (LWW sweeps) ──┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node hosting three in-process stores
//! ```bash
//! ringkv-node serve \
//!   --id node-1 \
//!   --bind 0.0.0.0:7000 \
//!   --local-nodes node-2,node-3
//! ```
//!
//! ### Join remote nodes
//! ```bash
//! ringkv-node serve --id node-1 --peers node-2=http://10.0.0.2:7000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! ringkv put my-key hello --consistency strong
//! ringkv get my-key
//! ringkv delete my-key
//! ringkv backup
//! ringkv restore <backup-id>
//! ringkv sync
//! ```
//!
//! ### Embed
//! ```no_run
//! # async fn demo() -> ringkv::Result<()> {
//! use ringkv::{Cluster, ClusterConfig, Consistency};
//!
//! let cluster = Cluster::in_memory(&["a", "b", "c"], ClusterConfig::default())?;
//! cluster.put("k", "v", Consistency::Strong).await?;
//! assert_eq!(cluster.get("k", Consistency::Strong).await?, b"v");
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordinator;
pub mod node;
pub mod ops;

// Re-export commonly used types
pub use common::{ClusterConfig, Config, Error, HashRing, Result};
pub use coordinator::{Cluster, Consistency, NodeServer};
pub use node::{Entry, NodeStore};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
