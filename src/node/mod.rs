//! Replica-side data model and storage
//!
//! Every node owns one `NodeStore` holding versioned entries. Deletes are
//! stored as tombstones so stale replicas cannot resurrect a key.

pub mod entry;
pub mod store;
pub mod version;

pub use entry::{Entry, META_CLIENT, META_ORIGIN};
#[cfg(feature = "sled-backend")]
pub use store::SledStore;
pub use store::{MemStore, NodeStore};
pub use version::VersionVector;
