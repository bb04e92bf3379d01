//! Lookups against a sealed image without loading it
//!
//! Only the header is read up front. Each query reads one slot and then one
//! item per chain hop with ranged backend reads.

use super::header::{IndexHeader, IndexLayout, HASH_SLOT_SIZE, HEADER_SIZE};
use super::item::{IndexItem, ITEM_SIZE};
use super::slot::EMPTY_SLOT;
use crate::backend::StorageBackend;
use crate::hash::KeyHasher;
use crate::{IndexError, IndexStatus, Result, TimeRange, Timestamp};
use bytes::Buf;
use std::fmt;
use std::sync::Arc;

/// Read-only view of a sealed index file stored in a backend
pub struct SealedIndexReader {
    backend: Arc<dyn StorageBackend>,
    header: IndexHeader,
    layout: IndexLayout,
}

impl SealedIndexReader {
    /// Validate the header and image size of the sealed file in `backend`
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let size = backend.size()?;
        if size < HEADER_SIZE as u64 {
            return Err(IndexError::InvalidFormat(format!(
                "Image of {} bytes has no header",
                size
            )));
        }

        let header = IndexHeader::decode(&backend.read(0, HEADER_SIZE)?)?;
        if header.status() != IndexStatus::Sealed {
            return Err(IndexError::InvalidFormat(
                "Index file has not been sealed".into(),
            ));
        }

        let layout = IndexLayout::from_image_len(header.slot_count, size)?;
        if layout.item_capacity != header.item_count {
            return Err(IndexError::InvalidFormat(format!(
                "Sealed image holds {} item records for {} items",
                layout.item_capacity, header.item_count
            )));
        }

        Ok(Self {
            backend,
            header,
            layout,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn begin_timestamp(&self) -> Timestamp {
        self.header.begin_timestamp
    }

    pub fn end_timestamp(&self) -> Timestamp {
        self.header.end_timestamp
    }

    pub fn item_count(&self) -> u32 {
        self.header.item_count
    }

    /// Offsets indexed for `key` of `topic` within `[begin, end]`, newest first
    pub fn query(
        &self,
        topic: &str,
        key: &str,
        begin: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<i64>> {
        Ok(self
            .query_items(topic, key, begin, end, usize::MAX)?
            .into_iter()
            .map(|item| item.offset)
            .collect())
    }

    /// Up to `max_count` matching items, newest first
    pub fn query_items(
        &self,
        topic: &str,
        key: &str,
        begin: Timestamp,
        end: Timestamp,
        max_count: usize,
    ) -> Result<Vec<IndexItem>> {
        let (key_hash, slot) = KeyHasher::locate(topic, key, self.header.slot_count);
        let mut raw = self
            .backend
            .read(self.layout.slot_position(slot), HASH_SLOT_SIZE)?;
        let mut cursor = raw.get_i64();
        let range = TimeRange::new(begin, end);

        // Every hop must move strictly towards older items
        let mut bound = self.header.item_count as i64;
        let mut result = Vec::new();
        while cursor != EMPTY_SLOT && result.len() < max_count {
            if !(0..bound).contains(&cursor) {
                return Err(IndexError::InvalidFormat(format!(
                    "Chain of slot {} reaches item {} (bound {})",
                    slot, cursor, bound
                )));
            }

            let data = self
                .backend
                .read(self.layout.item_position(cursor as u32), ITEM_SIZE)?;
            let item = IndexItem::decode(&data)?;

            if item.key_hash == key_hash
                && range.contains(item.timestamp(self.header.begin_timestamp))
            {
                result.push(item);
            }

            bound = cursor;
            cursor = item.prev_index as i64;
        }

        Ok(result)
    }

    /// [`SealedIndexReader::query_items`] on tokio's blocking pool
    pub async fn query_async(
        self: &Arc<Self>,
        topic: String,
        key: String,
        begin: Timestamp,
        end: Timestamp,
        max_count: usize,
    ) -> Result<Vec<IndexItem>> {
        let reader = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            reader.query_items(&topic, &key, begin, end, max_count)
        })
        .await
        .map_err(|e| IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

impl fmt::Debug for SealedIndexReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedIndexReader")
            .field("header", &self.header)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, MemoryBackend};
    use crate::index::{IndexStoreConfig, IndexStoreFile};
    use bytes::BytesMut;

    fn sealed_backend() -> Arc<dyn StorageBackend> {
        let config = IndexStoreConfig {
            max_hash_slot_num: 5,
            max_index_num: 20,
            backend: BackendKind::Memory,
            ..Default::default()
        };
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let file = IndexStoreFile::new(&config, 1_000, backend.clone()).unwrap();
        file.put("T", "K", 100, 1_001).unwrap();
        file.put("T", "Other", 150, 1_002).unwrap();
        file.put("T", "K", 200, 1_003).unwrap();
        file.seal().unwrap();
        backend
    }

    #[test]
    fn test_reader_matches_file() {
        let reader = SealedIndexReader::open(sealed_backend()).unwrap();
        assert_eq!(reader.item_count(), 3);
        assert_eq!(reader.begin_timestamp(), 1_000);
        assert_eq!(reader.end_timestamp(), 1_003);

        assert_eq!(reader.query("T", "K", 0, i64::MAX).unwrap(), vec![200, 100]);
        assert_eq!(reader.query("T", "K", 1_002, 1_003).unwrap(), vec![200]);
        assert_eq!(reader.query("T", "Other", 0, i64::MAX).unwrap(), vec![150]);
        assert!(reader.query("T", "Missing", 0, i64::MAX).unwrap().is_empty());
        assert_eq!(reader.query_items("T", "K", 0, i64::MAX, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_reader_rejects_unsealed() {
        let config = IndexStoreConfig {
            max_hash_slot_num: 5,
            max_index_num: 20,
            backend: BackendKind::Memory,
            ..Default::default()
        };
        let file = IndexStoreFile::new(&config, 1_000, Arc::new(MemoryBackend::new())).unwrap();
        let image = file.to_bytes().unwrap();

        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_bytes(&image));
        assert!(SealedIndexReader::open(backend).unwrap_err().is_corruption());

        let empty: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        assert!(SealedIndexReader::open(empty).is_err());
    }

    #[test]
    fn test_reader_debug() {
        let reader = SealedIndexReader::open(sealed_backend()).unwrap();
        let debug = format!("{:?}", reader);
        assert!(debug.contains("SealedIndexReader"));
        assert!(debug.contains("item_count: 3"));
    }

    #[test]
    fn test_reader_detects_cycles() {
        let backend = sealed_backend();
        let size = backend.size().unwrap() as usize;
        let mut image = BytesMut::from(&backend.read(0, size).unwrap()[..]);

        // Point item 0 ("T#K", the oldest) back at item 2
        let layout = IndexLayout::new(5, 3);
        let prev = layout.item_position(0) as usize + 28;
        image[prev..prev + 4].copy_from_slice(&2i32.to_be_bytes());

        let corrupt: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_bytes(&image));
        let reader = SealedIndexReader::open(corrupt).unwrap();
        assert!(reader.query("T", "K", 0, i64::MAX).unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_query_async() {
        let reader = Arc::new(SealedIndexReader::open(sealed_backend()).unwrap());
        let items = reader
            .query_async("T".to_string(), "K".to_string(), 0, i64::MAX, 10)
            .await
            .unwrap();
        assert_eq!(items.iter().map(|i| i.offset).collect::<Vec<_>>(), vec![200, 100]);
    }
}
