//! In-process backend, used for tests and as an object-store stand-in

use super::StorageBackend;
use crate::Result;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::io::{Error, ErrorKind};

/// Backend keeping all bytes in memory
pub struct MemoryBackend {
    // None once deleted
    data: RwLock<Option<BytesMut>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Some(BytesMut::new())),
        }
    }

    /// Create a backend already holding `bytes`
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            data: RwLock::new(Some(BytesMut::from(bytes))),
        }
    }

    /// Whether `delete` has been called
    pub fn is_deleted(&self) -> bool {
        self.data.read().is_none()
    }

    fn deleted() -> Error {
        Error::new(ErrorKind::NotFound, "memory backend has been deleted")
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut guard = self.data.write();
        let buf = guard.as_mut().ok_or_else(Self::deleted)?;
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let guard = self.data.read();
        let buf = guard.as_ref().ok_or_else(Self::deleted)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.checked_add(len).filter(|end| *end <= buf.len()).ok_or_else(|| {
            Error::new(
                ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end {}", len, offset, buf.len()),
            )
        })?;
        Ok(Bytes::copy_from_slice(&buf[start..end]))
    }

    fn flush(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(Self::deleted().into());
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.data.write().take();
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let guard = self.data.read();
        let buf = guard.as_ref().ok_or_else(Self::deleted)?;
        Ok(buf.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexError;

    #[test]
    fn test_append_and_read() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read(6, 5).unwrap()[..], b"world");
        backend.flush().unwrap();
    }

    #[test]
    fn test_read_past_end() {
        let backend = MemoryBackend::with_bytes(b"abc");
        match backend.read(2, 2) {
            Err(IndexError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {:?}", other.map(|b| b.len())),
        }
        assert!(backend.read(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_default_is_usable() {
        let backend = MemoryBackend::default();
        assert!(!backend.is_deleted());
        assert_eq!(backend.append(b"x").unwrap(), 0);
    }

    #[test]
    fn test_delete() {
        let backend = MemoryBackend::with_bytes(b"abc");
        backend.delete().unwrap();
        assert!(backend.is_deleted());
        assert!(backend.append(b"x").is_err());
        assert!(backend.read(0, 1).is_err());
        // Deleting twice is fine
        backend.delete().unwrap();
    }
}
