//! Tierindex Core - Persistent Hash-Slot Index Files
//!
//! Maps `(topic, key)` pairs to the physical offsets of the messages that
//! carry them, so a tiered message store can answer key lookups without
//! scanning its log.
//!
//! # Architecture
//!
//! - **KeyHasher**: composite keys and a stable 32-bit hash
//! - **HashSlotTable**: one chain head per hash slot
//! - **IndexItemLog**: fixed-capacity array of 32-byte items chained per slot
//! - **IndexStoreFile**: mutable file, sealed once and persisted to a backend
//! - **SealedIndexReader**: ranged lookups straight from a sealed image
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tierindex_core::backend::{BackendKind, MemoryBackend};
//! use tierindex_core::index::{IndexStoreConfig, IndexStoreFile};
//!
//! let config = IndexStoreConfig {
//!     max_hash_slot_num: 64,
//!     max_index_num: 256,
//!     backend: BackendKind::Memory,
//!     ..Default::default()
//! };
//! let file = IndexStoreFile::new(&config, 1_000, Arc::new(MemoryBackend::new())).unwrap();
//! file.put("TopicTest", "MessageKey", 100, 1_010).unwrap();
//! file.put("TopicTest", "MessageKey", 200, 1_020).unwrap();
//! assert_eq!(file.query("TopicTest", "MessageKey", 1_000, 1_020).unwrap(), vec![200, 100]);
//! ```

pub mod backend;
pub mod hash;
pub mod index;

mod error;
mod types;

pub use error::{IndexError, Result};
pub use types::*;

/// Tierindex version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Hash slots per index file
    pub const MAX_HASH_SLOT_NUM: u32 = 1_000_000;

    /// Item capacity per index file
    pub const MAX_INDEX_NUM: u32 = 4_000_000;

    /// Root directory for posix index files
    pub const STORE_PATH: &str = "data";
}
