//! Index items and the append-only item log
//!
//! Each item is a fixed 32-byte record. Items hashed to the same slot form
//! a chain through `prev_index`, newest to oldest.

use crate::{IndexError, Result, Timestamp};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

/// Encoded size of one item
pub const ITEM_SIZE: usize = 32;

/// `prev_index` of the oldest item in a chain
pub const NO_PREVIOUS: i32 = -1;

/// One indexed occurrence of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexItem {
    /// Hash of the composite key
    pub key_hash: i32,
    pub topic_id: i32,
    pub queue_id: i32,
    /// Physical offset of the message
    pub offset: i64,
    pub size: i32,
    /// Milliseconds since the file's begin timestamp
    pub time_diff: i32,
    /// Previous item in the same slot chain, or [`NO_PREVIOUS`]
    pub prev_index: i32,
}

impl IndexItem {
    /// Absolute timestamp of the item
    pub fn timestamp(&self, begin_timestamp: Timestamp) -> Timestamp {
        begin_timestamp + self.time_diff as i64
    }

    /// Whether the item ends its chain
    pub fn is_oldest(&self) -> bool {
        self.prev_index == NO_PREVIOUS
    }

    /// Append the 32 encoded bytes to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.key_hash);
        buf.put_i32(self.topic_id);
        buf.put_i32(self.queue_id);
        buf.put_i64(self.offset);
        buf.put_i32(self.size);
        buf.put_i32(self.time_diff);
        buf.put_i32(self.prev_index);
    }

    /// Decode an item from the first 32 bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ITEM_SIZE {
            return Err(IndexError::InvalidFormat(format!(
                "Truncated index item: {} of {} bytes",
                data.len(),
                ITEM_SIZE
            )));
        }

        let mut cursor = &data[..ITEM_SIZE];
        Ok(Self {
            key_hash: cursor.get_i32(),
            topic_id: cursor.get_i32(),
            queue_id: cursor.get_i32(),
            offset: cursor.get_i64(),
            size: cursor.get_i32(),
            time_diff: cursor.get_i32(),
            prev_index: cursor.get_i32(),
        })
    }
}

// Item storage shared between writers and lock-free readers. Fields are
// written before the owning slot head is published with Release, so Relaxed
// accesses here are ordered by that store/load pair.
#[derive(Default)]
struct ItemCell {
    key_hash: AtomicI32,
    topic_id: AtomicI32,
    queue_id: AtomicI32,
    offset: AtomicI64,
    size: AtomicI32,
    time_diff: AtomicI32,
    prev_index: AtomicI32,
}

impl ItemCell {
    fn store(&self, item: &IndexItem) {
        self.key_hash.store(item.key_hash, Ordering::Relaxed);
        self.topic_id.store(item.topic_id, Ordering::Relaxed);
        self.queue_id.store(item.queue_id, Ordering::Relaxed);
        self.offset.store(item.offset, Ordering::Relaxed);
        self.size.store(item.size, Ordering::Relaxed);
        self.time_diff.store(item.time_diff, Ordering::Relaxed);
        self.prev_index.store(item.prev_index, Ordering::Relaxed);
    }

    fn load(&self) -> IndexItem {
        IndexItem {
            key_hash: self.key_hash.load(Ordering::Relaxed),
            topic_id: self.topic_id.load(Ordering::Relaxed),
            queue_id: self.queue_id.load(Ordering::Relaxed),
            offset: self.offset.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            time_diff: self.time_diff.load(Ordering::Relaxed),
            prev_index: self.prev_index.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-capacity, append-only array of index items
pub struct IndexItemLog {
    cells: Box<[ItemCell]>,
    /// Number of claimed indexes, never above `cells.len()`
    count: AtomicU32,
}

impl IndexItemLog {
    /// Create an empty log with room for `capacity` items
    pub fn new(capacity: u32) -> Self {
        let cells = (0..capacity).map(|_| ItemCell::default()).collect();
        Self {
            cells,
            count: AtomicU32::new(0),
        }
    }

    /// Rebuild a log whose first `items.len()` entries are already written
    pub fn with_items(capacity: u32, items: &[IndexItem]) -> Result<Self> {
        if items.len() > capacity as usize {
            return Err(IndexError::InvalidFormat(format!(
                "{} items exceed capacity {}",
                items.len(),
                capacity
            )));
        }

        let log = Self::new(capacity);
        for (cell, item) in log.cells.iter().zip(items) {
            cell.store(item);
        }
        log.count.store(items.len() as u32, Ordering::Release);
        Ok(log)
    }

    /// Claim the next free index, or `None` when the log is full
    pub fn reserve(&self) -> Option<u32> {
        let capacity = self.capacity();
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then(|| n + 1)
            })
            .ok()
    }

    /// Write the item at a reserved index
    pub fn write(&self, index: u32, item: &IndexItem) {
        self.cells[index as usize].store(item);
    }

    /// Read the item at `index`, `None` if it lies beyond the claimed range
    pub fn read(&self, index: u32) -> Option<IndexItem> {
        if index >= self.len() {
            return None;
        }
        Some(self.cells[index as usize].load())
    }

    /// Number of claimed items
    pub fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items
    pub fn capacity(&self) -> u32 {
        self.cells.len() as u32
    }

    /// Free item slots left
    pub fn remaining(&self) -> u32 {
        self.capacity() - self.len()
    }

    /// Encode the first `count` cells, claimed or not
    pub fn encode<B: BufMut>(&self, buf: &mut B, count: u32) {
        for cell in self.cells.iter().take(count as usize) {
            cell.load().encode(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn item(offset: i64, prev_index: i32) -> IndexItem {
        IndexItem {
            key_hash: 81884,
            topic_id: 7,
            queue_id: 2,
            offset,
            size: 1024,
            time_diff: 50,
            prev_index,
        }
    }

    #[test]
    fn test_item_layout() {
        let mut buf = BytesMut::new();
        item(666, NO_PREVIOUS).encode(&mut buf);
        assert_eq!(buf.len(), ITEM_SIZE);

        assert_eq!(&buf[0..4], &81884i32.to_be_bytes()[..]);
        assert_eq!(&buf[12..20], &666i64.to_be_bytes()[..]);
        assert_eq!(&buf[28..32], &(-1i32).to_be_bytes()[..]);

        let decoded = IndexItem::decode(&buf).unwrap();
        assert_eq!(decoded, item(666, NO_PREVIOUS));
        assert!(decoded.is_oldest());
        assert_eq!(decoded.timestamp(1_000), 1_050);

        assert!(IndexItem::decode(&buf[..31]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_reserve_until_full() {
        let log = IndexItemLog::new(3);
        assert!(log.is_empty());
        assert_eq!(log.reserve(), Some(0));
        assert_eq!(log.reserve(), Some(1));
        assert_eq!(log.reserve(), Some(2));
        assert_eq!(log.reserve(), None);
        assert_eq!(log.reserve(), None);
        assert_eq!(log.len(), 3);
        assert_eq!(log.remaining(), 0);
    }

    #[test]
    fn test_write_and_read() {
        let log = IndexItemLog::new(4);
        let first = log.reserve().unwrap();
        log.write(first, &item(100, NO_PREVIOUS));
        let second = log.reserve().unwrap();
        log.write(second, &item(200, first as i32));

        assert_eq!(log.read(1).unwrap().prev_index, 0);
        assert_eq!(log.read(0).unwrap().offset, 100);
        // Unclaimed indexes are not readable
        assert!(log.read(2).is_none());
        assert!(log.read(100).is_none());
    }

    #[test]
    fn test_with_items_and_encode() {
        let items = [item(1, NO_PREVIOUS), item(2, 0)];
        let log = IndexItemLog::with_items(4, &items).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.capacity(), 4);

        let mut buf = BytesMut::new();
        log.encode(&mut buf, 4);
        assert_eq!(buf.len(), 4 * ITEM_SIZE);
        assert_eq!(IndexItem::decode(&buf[ITEM_SIZE..]).unwrap(), items[1]);
        // Unwritten cells encode as zeros
        assert!(buf[2 * ITEM_SIZE..].iter().all(|b| *b == 0));

        assert!(IndexItemLog::with_items(1, &items).is_err());
    }

    #[test]
    fn test_concurrent_reserve_is_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let log = Arc::new(IndexItemLog::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(index) = log.reserve() {
                        claimed.push(index);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(all.insert(index));
            }
        }
        assert_eq!(all.len(), 1000);
        assert_eq!(log.len(), 1000);
    }
}
