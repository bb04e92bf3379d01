//! Hash-slot index files
//!
//! An index file maps `topic#key` to the offsets of the messages carrying
//! that key. Keys hash into a fixed table of slots, and each slot heads a
//! chain of items linked newest to oldest.

pub mod header;
pub mod item;
pub mod slot;

mod file;
mod reader;

pub use file::IndexStoreFile;
pub use header::{IndexHeader, IndexLayout};
pub use item::{IndexItem, IndexItemLog};
pub use reader::SealedIndexReader;
pub use slot::HashSlotTable;

use crate::backend::BackendKind;
use crate::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index file configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexStoreConfig {
    /// Root directory; posix index files go under `store_path/index`
    pub store_path: PathBuf,
    /// Number of hash slots per file
    pub max_hash_slot_num: u32,
    /// Item capacity per file
    pub max_index_num: u32,
    /// Backend new files are created on
    pub backend: BackendKind,
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(crate::config::STORE_PATH),
            max_hash_slot_num: crate::config::MAX_HASH_SLOT_NUM,
            max_index_num: crate::config::MAX_INDEX_NUM,
            backend: BackendKind::default(),
        }
    }
}

impl IndexStoreConfig {
    /// Check that slot count and capacity fit the on-disk header
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_hash_slot_num", self.max_hash_slot_num),
            ("max_index_num", self.max_index_num),
        ] {
            if value == 0 || value > i32::MAX as u32 {
                return Err(IndexError::InvalidArgument(format!(
                    "{} must be in 1..={}, got {}",
                    name,
                    i32::MAX,
                    value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexStoreConfig::default();
        assert_eq!(config.max_hash_slot_num, 1_000_000);
        assert_eq!(config.max_index_num, 4_000_000);
        assert_eq!(config.backend, BackendKind::Posix);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config: IndexStoreConfig =
            serde_json::from_str(r#"{"max_hash_slot_num": 5, "backend": "memory"}"#).unwrap();
        assert_eq!(config.max_hash_slot_num, 5);
        assert_eq!(config.max_index_num, crate::config::MAX_INDEX_NUM);
        assert_eq!(config.backend, BackendKind::Memory);

        let json = serde_json::to_string(&config).unwrap();
        let back: IndexStoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate() {
        let zero = IndexStoreConfig {
            max_index_num: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(IndexError::InvalidArgument(_))));

        let huge = IndexStoreConfig {
            max_hash_slot_num: u32::MAX,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }
}
