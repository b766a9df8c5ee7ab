//! Request coordination and cluster membership
//!
//! - `replication`: one put/get/delete across a key's replica set
//! - `cluster`: ring, coordinator, synchronizer and backups behind one handle
//! - `transport` / `client`: how a coordinator reaches node stores
//! - `http` / `server`: public and internal HTTP API

pub mod client;
pub mod cluster;
pub mod http;
pub mod oplog;
pub mod replication;
pub mod server;
pub mod transport;

pub use client::HttpTransport;
pub use cluster::{Cluster, ClusterBuilder, DEFAULT_CLIENT_ID};
pub use oplog::{OpType, OperationLog, OperationRecord};
pub use replication::{quorum, Consistency, ReplicationCoordinator, RequestState};
pub use server::NodeServer;
pub use transport::{LocalTransport, Transport};
