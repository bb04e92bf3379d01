//! Mutable index file
//!
//! An [`IndexStoreFile`] lives in memory while it accepts writes and is
//! persisted to its backend once, when sealed. Many threads may `put` and
//! `query` at the same time:
//!
//! - writers to one slot serialize on that slot's lock, readers never lock
//!   a slot and follow published heads only
//! - the lifecycle sits behind a `RwLock`; `put`/`query` hold it shared,
//!   `seal`/`shutdown`/`to_bytes` hold it exclusively, so sealing waits for
//!   every in-flight put

use super::header::{IndexHeader, IndexLayout, HEADER_SIZE};
use super::item::{IndexItem, IndexItemLog, ITEM_SIZE, NO_PREVIOUS};
use super::slot::{HashSlotTable, EMPTY_SLOT};
use super::IndexStoreConfig;
use crate::backend::{index_file_path, StorageBackend};
use crate::hash::KeyHasher;
use crate::{IndexError, IndexStatus, MessageLocation, Result, TimeRange, Timestamp};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unsealed,
    Sealed { persisted: Persistence },
}

/// How far the sealed image got into the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persistence {
    Pending,
    /// Appended but not flushed; a retry only flushes
    Appended,
    Durable,
}

impl Lifecycle {
    fn status(self) -> IndexStatus {
        match self {
            Lifecycle::Unsealed => IndexStatus::Unsealed,
            Lifecycle::Sealed { .. } => IndexStatus::Sealed,
        }
    }
}

struct Tables {
    slots: HashSlotTable,
    items: IndexItemLog,
}

struct FileState {
    lifecycle: Lifecycle,
    /// None after shutdown
    tables: Option<Tables>,
    /// Item count captured when the tables were released
    released_item_count: u32,
}

impl FileState {
    fn tables(&self) -> Result<&Tables> {
        self.tables.as_ref().ok_or(IndexError::Closed)
    }
}

/// Hash-slot index over message keys
pub struct IndexStoreFile {
    begin_timestamp: Timestamp,
    end_timestamp: AtomicI64,
    slot_count: u32,
    item_capacity: u32,
    state: RwLock<FileState>,
    backend: Arc<dyn StorageBackend>,
}

impl IndexStoreFile {
    /// Create an empty, unsealed index file on `backend`
    ///
    /// The backend must be empty; it receives the sealed image later.
    pub fn new(
        config: &IndexStoreConfig,
        begin_timestamp: Timestamp,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let existing = backend.size()?;
        if existing != 0 {
            return Err(IndexError::InvalidArgument(format!(
                "Backend already holds {} bytes, load it instead",
                existing
            )));
        }

        let file = Self::with_tables(
            begin_timestamp,
            begin_timestamp,
            Lifecycle::Unsealed,
            Tables {
                slots: HashSlotTable::new(config.max_hash_slot_num),
                items: IndexItemLog::new(config.max_index_num),
            },
            backend,
        );

        info!(
            "Created index file at {} with {} slots and {} items",
            begin_timestamp, config.max_hash_slot_num, config.max_index_num
        );

        Ok(file)
    }

    /// Create an index file on the backend selected by `config`
    ///
    /// Posix files are placed under `store_path/index`, named after the
    /// begin timestamp.
    pub fn create(config: &IndexStoreConfig, begin_timestamp: Timestamp) -> Result<Self> {
        let path = index_file_path(&config.store_path, begin_timestamp);
        let backend = config.backend.open(&path)?;
        Self::new(config, begin_timestamp, backend)
    }

    fn with_tables(
        begin_timestamp: Timestamp,
        end_timestamp: Timestamp,
        lifecycle: Lifecycle,
        tables: Tables,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            begin_timestamp,
            end_timestamp: AtomicI64::new(end_timestamp),
            slot_count: tables.slots.len(),
            item_capacity: tables.items.capacity(),
            state: RwLock::new(FileState {
                lifecycle,
                tables: Some(tables),
                released_item_count: 0,
            }),
            backend,
        }
    }

    /// Rebuild an index file from a serialized image
    ///
    /// A sealed image counts as persisted only when `backend` already holds
    /// exactly these bytes; on an empty backend the next `seal` writes it.
    /// An unsealed image resumes taking writes and needs an empty backend to
    /// be sealed into. Images breaking any pointer invariant are rejected.
    pub fn from_bytes(data: &[u8], backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let header = IndexHeader::decode(data)?;
        let layout = IndexLayout::from_image_len(header.slot_count, data.len() as u64)?;

        if header.item_count > layout.item_capacity {
            return Err(IndexError::InvalidFormat(format!(
                "Item count {} exceeds item table capacity {}",
                header.item_count, layout.item_capacity
            )));
        }

        let status = header.status();
        let lifecycle = match status {
            IndexStatus::Unsealed => {
                let existing = backend.size()?;
                if existing != 0 {
                    return Err(IndexError::InvalidArgument(format!(
                        "Unsealed image needs an empty backend, found {} bytes",
                        existing
                    )));
                }
                Lifecycle::Unsealed
            }
            IndexStatus::Sealed => {
                if layout.item_capacity != header.item_count {
                    return Err(IndexError::InvalidFormat(format!(
                        "Sealed image holds {} item records for {} items",
                        layout.item_capacity, header.item_count
                    )));
                }
                Lifecycle::Sealed {
                    persisted: Self::sealed_copy_in(data, backend.as_ref())?,
                }
            }
        };

        let items_start = layout.items_start() as usize;
        let slots = HashSlotTable::decode(&data[HEADER_SIZE..items_start], header.slot_count)?;
        if let Some((slot, head)) = slots.find_dangling(header.item_count) {
            return Err(IndexError::InvalidFormat(format!(
                "Slot {} points at item {} of {}",
                slot, head, header.item_count
            )));
        }

        let mut items = Vec::with_capacity(header.item_count as usize);
        for (index, chunk) in data[items_start..]
            .chunks_exact(ITEM_SIZE)
            .take(header.item_count as usize)
            .enumerate()
        {
            let item = IndexItem::decode(chunk)?;
            if item.prev_index != NO_PREVIOUS
                && !(0..index as i64).contains(&(item.prev_index as i64))
            {
                return Err(IndexError::InvalidFormat(format!(
                    "Item {} links to item {}",
                    index, item.prev_index
                )));
            }
            items.push(item);
        }

        let tables = Tables {
            slots,
            items: IndexItemLog::with_items(layout.item_capacity, &items)?,
        };

        debug!(
            "Loaded {} index file at {} with {} items",
            status, header.begin_timestamp, header.item_count
        );

        Ok(Self::with_tables(
            header.begin_timestamp,
            header.end_timestamp,
            lifecycle,
            tables,
            backend,
        ))
    }

    fn sealed_copy_in(data: &[u8], backend: &dyn StorageBackend) -> Result<Persistence> {
        let existing = backend.size()?;
        if existing == 0 {
            return Ok(Persistence::Pending);
        }
        if existing == data.len() as u64 && backend.read(0, data.len())?[..] == *data {
            return Ok(Persistence::Durable);
        }
        Err(IndexError::InvalidArgument(format!(
            "Backend holds {} bytes that differ from the sealed image",
            existing
        )))
    }

    /// Load the image stored in `backend`
    pub fn load(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let size = backend.size()?;
        let len = usize::try_from(size).map_err(|_| {
            IndexError::InvalidFormat(format!("Image of {} bytes cannot be addressed", size))
        })?;
        let data = backend.read(0, len)?;

        Self::from_bytes(&data, backend).map_err(|e| {
            if e.is_corruption() {
                warn!("Quarantining corrupt index file: {}", e);
            }
            e
        })
    }

    /// Index `key` of `topic` at `offset`
    pub fn put(&self, topic: &str, key: &str, offset: i64, timestamp: Timestamp) -> Result<()> {
        self.put_keys(topic, &[key], MessageLocation::at_offset(offset), timestamp)
    }

    /// Index one message under every key in `keys`
    ///
    /// A batch that cannot fit seals the file and fails with
    /// `CapacityExceeded`. Keys are not indexed atomically: when writers race
    /// for the last free items a batch may be stored in part.
    pub fn put_keys<K: AsRef<str>>(
        &self,
        topic: &str,
        keys: &[K],
        location: MessageLocation,
        timestamp: Timestamp,
    ) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(IndexError::InvalidArgument("Topic must not be blank".into()));
        }
        if keys.is_empty() {
            return Ok(());
        }
        let time_diff = self.time_diff(timestamp)?;

        let fitted = {
            let state = self.state.read();
            let tables = state.tables()?;
            if state.lifecycle != Lifecycle::Unsealed {
                return Err(IndexError::Sealed);
            }

            if (tables.items.remaining() as usize) < keys.len() {
                false
            } else {
                let mut fitted = true;
                for key in keys {
                    let (key_hash, slot) = KeyHasher::locate(topic, key.as_ref(), self.slot_count);
                    let item = IndexItem {
                        key_hash,
                        topic_id: location.topic_id,
                        queue_id: location.queue_id,
                        offset: location.offset,
                        size: location.size,
                        time_diff,
                        prev_index: 0,
                    };
                    if !Self::link(tables, slot, item) {
                        fitted = false;
                        break;
                    }
                    self.end_timestamp.fetch_max(timestamp, Ordering::AcqRel);
                }
                fitted
            }
        };

        if fitted {
            Ok(())
        } else {
            Err(self.seal_when_full())
        }
    }

    // Reserve, write and publish under the slot lock so the linked head is
    // always older than the new item.
    fn link(tables: &Tables, slot: u32, mut item: IndexItem) -> bool {
        let _guard = tables.slots.lock(slot);
        let Some(index) = tables.items.reserve() else {
            return false;
        };
        item.prev_index = tables.slots.read(slot) as i32;
        tables.items.write(index, &item);
        tables.slots.write(slot, index);
        true
    }

    fn seal_when_full(&self) -> IndexError {
        let mut state = self.state.write();
        if state.lifecycle == Lifecycle::Unsealed {
            state.lifecycle = Lifecycle::Sealed {
                persisted: Persistence::Pending,
            };
            warn!(
                "Index file at {} reached {} items, sealing",
                self.begin_timestamp, self.item_capacity
            );
        }
        IndexError::CapacityExceeded {
            capacity: self.item_capacity,
        }
    }

    fn time_diff(&self, timestamp: Timestamp) -> Result<i32> {
        timestamp
            .checked_sub(self.begin_timestamp)
            .and_then(|diff| i32::try_from(diff).ok())
            .ok_or(IndexError::TimestampOutOfRange {
                timestamp,
                begin: self.begin_timestamp,
            })
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

    /// Up to `max_count` items indexed for `key` of `topic` within
    /// `[begin, end]`, newest first
    ///
    /// Items whose stored hash differs from the key's are skipped; distinct
    /// keys sharing a hash are not told apart.
    pub fn query_items(
        &self,
        topic: &str,
        key: &str,
        begin: Timestamp,
        end: Timestamp,
        max_count: usize,
    ) -> Result<Vec<IndexItem>> {
        let state = self.state.read();
        let tables = state.tables()?;
        let (key_hash, slot) = KeyHasher::locate(topic, key, self.slot_count);
        let range = TimeRange::new(begin, end);

        let mut result = Vec::new();
        let mut cursor = tables.slots.read(slot);
        while cursor != EMPTY_SLOT && result.len() < max_count {
            let item = Self::chain_item(tables, cursor)?;
            if item.key_hash == key_hash
                && range.contains(item.timestamp(self.begin_timestamp))
            {
                result.push(item);
            }
            cursor = item.prev_index as i64;
        }

        Ok(result)
    }

    fn chain_item(tables: &Tables, index: i64) -> Result<IndexItem> {
        u32::try_from(index)
            .ok()
            .and_then(|index| tables.items.read(index))
            .ok_or_else(|| IndexError::InvalidFormat(format!("Dangling item pointer {}", index)))
    }

    /// Seal the file and persist its image to the backend
    ///
    /// Waits for in-flight puts. Calling it again after success is a no-op.
    /// After a failed flush a retry only flushes again. A backend left
    /// holding bytes by a failed append is refused, never appended to twice.
    pub fn seal(&self) -> Result<()> {
        let mut state = self.state.write();
        let lifecycle = state.lifecycle;
        match lifecycle {
            Lifecycle::Sealed {
                persisted: Persistence::Durable,
            } => return Ok(()),
            Lifecycle::Sealed {
                persisted: Persistence::Appended,
            } => return self.flush_sealed(&mut state),
            _ => {}
        }
        if state.tables.is_none() {
            return Err(IndexError::Closed);
        }

        state.lifecycle = Lifecycle::Sealed {
            persisted: Persistence::Pending,
        };

        let existing = self.backend.size()?;
        if existing != 0 {
            warn!(
                "Backend of index file at {} already holds {} bytes, refusing to append",
                self.begin_timestamp, existing
            );
            return Err(IndexError::InvalidFormat(format!(
                "Backend holds {} bytes ahead of the sealed image",
                existing
            )));
        }

        let tables = state.tables()?;
        let item_count = tables.items.len();
        let image = self.encode_image(tables, IndexStatus::Sealed);

        if let Err(e) = self.backend.append(&image) {
            warn!("Failed to append sealed index file at {}: {}", self.begin_timestamp, e);
            return Err(e);
        }
        state.lifecycle = Lifecycle::Sealed {
            persisted: Persistence::Appended,
        };
        self.flush_sealed(&mut state)?;

        info!(
            "Sealed index file at {}: {} items, {} bytes",
            self.begin_timestamp,
            item_count,
            image.len()
        );
        Ok(())
    }

    fn flush_sealed(&self, state: &mut FileState) -> Result<()> {
        if let Err(e) = self.backend.flush() {
            warn!("Failed to flush sealed index file at {}: {}", self.begin_timestamp, e);
            return Err(e);
        }
        state.lifecycle = Lifecycle::Sealed {
            persisted: Persistence::Durable,
        };
        Ok(())
    }

    /// Seal and persist; the file's compaction step
    pub fn do_compaction(&self) -> Result<()> {
        self.seal()
    }

    /// Release the in-memory tables
    ///
    /// Nothing is persisted; later puts and queries fail with `Closed`.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        if let Some(tables) = state.tables.take() {
            state.released_item_count = tables.items.len();
            info!("Shut down index file at {}", self.begin_timestamp);
        }
    }

    /// Shut down and delete the backend storage
    pub fn destroy(&self) -> Result<()> {
        self.shutdown();
        self.backend.delete()?;
        info!("Destroyed index file at {}", self.begin_timestamp);
        Ok(())
    }

    /// Serialize the current image
    ///
    /// Unsealed images carry the full item table; sealed images only the
    /// items written.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let state = self.state.write();
        let tables = state.tables()?;
        Ok(self.encode_image(tables, state.lifecycle.status()))
    }

    fn encode_image(&self, tables: &Tables, status: IndexStatus) -> Bytes {
        let item_count = tables.items.len();
        let capacity = match status {
            IndexStatus::Unsealed => self.item_capacity,
            IndexStatus::Sealed => item_count,
        };
        let layout = IndexLayout::new(self.slot_count, capacity);

        let mut buf = BytesMut::with_capacity(layout.image_size() as usize);
        self.make_header(status, item_count).encode(&mut buf);
        tables.slots.encode(&mut buf);
        tables.items.encode(&mut buf, capacity);
        buf.freeze()
    }

    fn make_header(&self, status: IndexStatus, item_count: u32) -> IndexHeader {
        IndexHeader {
            magic_code: IndexHeader::magic_for(status),
            begin_timestamp: self.begin_timestamp,
            end_timestamp: self.end_timestamp.load(Ordering::Acquire),
            slot_count: self.slot_count,
            item_count,
        }
    }

    /// Current header fields
    pub fn header(&self) -> IndexHeader {
        self.make_header(self.state(), self.item_count())
    }

    /// Lifecycle status
    pub fn state(&self) -> IndexStatus {
        self.state.read().lifecycle.status()
    }

    pub fn begin_timestamp(&self) -> Timestamp {
        self.begin_timestamp
    }

    /// Alias of [`IndexStoreFile::begin_timestamp`]
    pub fn timestamp(&self) -> Timestamp {
        self.begin_timestamp
    }

    /// Largest timestamp indexed so far
    pub fn end_timestamp(&self) -> Timestamp {
        self.end_timestamp.load(Ordering::Acquire)
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Items written so far
    pub fn item_count(&self) -> u32 {
        let state = self.state.read();
        match &state.tables {
            Some(tables) => tables.items.len(),
            None => state.released_item_count,
        }
    }

    /// Item capacity
    pub fn max_item_count(&self) -> u32 {
        self.item_capacity
    }

    /// Byte offset of `slot` in the image
    pub fn slot_position(&self, slot: u32) -> u64 {
        IndexLayout::new(self.slot_count, self.item_capacity).slot_position(slot)
    }

    /// Byte offset of item `index` in the image
    pub fn item_position(&self, index: u32) -> u64 {
        IndexLayout::new(self.slot_count, self.item_capacity).item_position(index)
    }

    /// Head item of `slot`, if any
    pub fn slot_head(&self, slot: u32) -> Result<Option<u32>> {
        self.check_slot(slot)?;
        let state = self.state.read();
        let head = state.tables()?.slots.read(slot);
        Ok(u32::try_from(head).ok())
    }

    /// Every `(index, item)` reachable from `slot`, newest first
    pub fn slot_chain(&self, slot: u32) -> Result<Vec<(u32, IndexItem)>> {
        self.check_slot(slot)?;
        let state = self.state.read();
        let tables = state.tables()?;

        let mut chain = Vec::new();
        let mut cursor = tables.slots.read(slot);
        while cursor != EMPTY_SLOT {
            let item = Self::chain_item(tables, cursor)?;
            chain.push((cursor as u32, item));
            cursor = item.prev_index as i64;
        }
        Ok(chain)
    }

    fn check_slot(&self, slot: u32) -> Result<()> {
        if slot >= self.slot_count {
            return Err(IndexError::InvalidArgument(format!(
                "Slot {} out of range for {} slots",
                slot, self.slot_count
            )));
        }
        Ok(())
    }

    /// Backend holding the persisted image
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }
}

impl fmt::Debug for IndexStoreFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.state.try_read().map(|state| state.lifecycle.status());
        f.debug_struct("IndexStoreFile")
            .field("begin_timestamp", &self.begin_timestamp)
            .field("end_timestamp", &self.end_timestamp())
            .field("slot_count", &self.slot_count)
            .field("item_capacity", &self.item_capacity)
            .field("status", &status)
            .finish_non_exhaustive()
    }
}
