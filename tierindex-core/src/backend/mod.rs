//! Backend storage providers
//!
//! An index file hands its bytes to a backend that only knows how to append,
//! read ranges, flush and delete. The index never locks the backend; any
//! ordering between writes is decided by the caller.

mod memory;
mod posix;

pub use memory::MemoryBackend;
pub use posix::PosixFileBackend;

use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw byte store behind an index file
pub trait StorageBackend: Send + Sync {
    /// Append bytes at the end, returning the offset they were written at
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Read exactly `len` bytes starting at `offset`
    fn read(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Make appended bytes durable
    fn flush(&self) -> Result<()>;

    /// Remove the stored bytes
    fn delete(&self) -> Result<()>;

    /// Number of bytes currently stored
    fn size(&self) -> Result<u64>;
}

/// Which backend an index file is created on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One local file per index file
    #[default]
    Posix,
    /// Process memory, nothing survives a restart
    Memory,
}

impl BackendKind {
    /// Open a backend of this kind for the given path
    ///
    /// The memory backend ignores the path.
    pub fn open(self, path: &Path) -> Result<Arc<dyn StorageBackend>> {
        match self {
            BackendKind::Posix => Ok(Arc::new(PosixFileBackend::open(path)?)),
            BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        }
    }
}

/// Path of the index file beginning at `begin_timestamp` under `store_path`
///
/// Names are the begin time rendered as `yyyyMMddHHmmssSSS` (UTC) so that a
/// directory listing sorts index files chronologically.
pub fn index_file_path(store_path: &Path, begin_timestamp: i64) -> PathBuf {
    let name = chrono::DateTime::from_timestamp_millis(begin_timestamp)
        .map(|t| t.format("%Y%m%d%H%M%S%3f").to_string())
        .unwrap_or_else(|| begin_timestamp.to_string());
    store_path.join("index").join(name)
}
