//! Cluster maintenance: anti-entropy, backups, rebalancing and verification

pub mod backup;
pub mod rebalance;
pub mod sync;
pub mod verify;

pub use backup::{Backup, BackupManager, BackupMetadata, BackupSummary};
pub use rebalance::{copy_to_owners, drop_non_owners, RebalanceReport};
pub use sync::{resolve_entries, SweepReport, SyncReport, Synchronizer};
pub use verify::{verify_cluster, VerifyReport};
