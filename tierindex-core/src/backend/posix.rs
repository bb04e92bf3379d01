//! Local file backend

use super::StorageBackend;
use crate::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Backend storing an index file's bytes in a single local file
pub struct PosixFileBackend {
    path: PathBuf,
    // None once deleted
    file: Mutex<Option<File>>,
}

impl PosixFileBackend {
    /// Open or create the file at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn deleted(&self) -> Error {
        Error::new(
            ErrorKind::NotFound,
            format!("{} has been deleted", self.path.display()),
        )
    }
}

impl StorageBackend for PosixFileBackend {
    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.deleted())?;
        let offset = file.metadata()?.len();
        file.write_all(data)?;
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.deleted())?;
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }

    fn flush(&self) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.deleted())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut guard = self.file.lock();
        guard.take();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Deleted index file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self) -> Result<u64> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(|| self.deleted())?;
        Ok(file.metadata()?.len())
    }
}
