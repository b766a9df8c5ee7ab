//! Common utilities and types shared across ringkv

pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackupConfig, ClusterConfig, Config, PeerConfig};
pub use error::{Error, Result};
pub use hash::{ring_hash, HashRing, DEFAULT_VIRTUAL_NODES};
pub use utils::{encode_key, parse_duration, retry_with_backoff, validate_key};
