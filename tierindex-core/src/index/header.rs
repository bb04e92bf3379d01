//! Index file header and physical layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (28 bytes, big-endian)                                │
//! │   magic i32 @0 | begin i64 @4 | end i64 @12 |                │
//! │   slot count i32 @20 | item count i32 @24                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot table: slot_count × i64 head item index (-1 = empty)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Item table: capacity × 32-byte items                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use super::item::ITEM_SIZE;
use crate::{IndexError, IndexStatus, Result, Timestamp};
use bytes::{Buf, BufMut};

/// Byte offset of the magic code
pub const MAGIC_CODE_OFFSET: usize = 0;
/// Byte offset of the begin timestamp
pub const BEGIN_TIMESTAMP_OFFSET: usize = 4;
/// Byte offset of the end timestamp
pub const END_TIMESTAMP_OFFSET: usize = 12;
/// Byte offset of the slot count
pub const SLOT_COUNT_OFFSET: usize = 20;
/// Byte offset of the item count
pub const ITEM_COUNT_OFFSET: usize = 24;
/// Total header size
pub const HEADER_SIZE: usize = 28;

/// Width of one hash slot
pub const HASH_SLOT_SIZE: usize = 8;

const BASE_SIGNATURE: u32 = 0xCCDD_EEFF;
const STRUCT_SIGNATURE: i32 = 1_880_681_586;

/// Magic code of a mutable image
pub const BEGIN_MAGIC_CODE: i32 = (BASE_SIGNATURE as i32) ^ (STRUCT_SIGNATURE + 4);
/// Magic code of a sealed image
pub const END_MAGIC_CODE: i32 = (BASE_SIGNATURE as i32) ^ (STRUCT_SIGNATURE + 8);

/// Decoded index file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// BEGIN or END magic code
    pub magic_code: i32,
    /// Creation timestamp, base for item time diffs
    pub begin_timestamp: Timestamp,
    /// Largest timestamp ever indexed
    pub end_timestamp: Timestamp,
    /// Number of hash slots
    pub slot_count: u32,
    /// Number of items written
    pub item_count: u32,
}

impl IndexHeader {
    /// Lifecycle status implied by the magic code
    pub fn status(&self) -> IndexStatus {
        if self.magic_code == END_MAGIC_CODE {
            IndexStatus::Sealed
        } else {
            IndexStatus::Unsealed
        }
    }

    /// Magic code for a file in `status`
    pub fn magic_for(status: IndexStatus) -> i32 {
        match status {
            IndexStatus::Unsealed => BEGIN_MAGIC_CODE,
            IndexStatus::Sealed => END_MAGIC_CODE,
        }
    }

    /// Append the 28 header bytes to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.magic_code);
        buf.put_i64(self.begin_timestamp);
        buf.put_i64(self.end_timestamp);
        buf.put_i32(self.slot_count as i32);
        buf.put_i32(self.item_count as i32);
    }

    /// Decode and validate a header from the start of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(IndexError::InvalidFormat(format!(
                "Truncated header: {} of {} bytes",
                data.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = &data[..HEADER_SIZE];
        let magic_code = cursor.get_i32();
        if magic_code != BEGIN_MAGIC_CODE && magic_code != END_MAGIC_CODE {
            return Err(IndexError::InvalidFormat(format!(
                "Invalid magic code: {:#010x}",
                magic_code
            )));
        }

        let begin_timestamp = cursor.get_i64();
        let end_timestamp = cursor.get_i64();
        let slot_count = cursor.get_i32();
        let item_count = cursor.get_i32();

        if slot_count <= 0 {
            return Err(IndexError::InvalidFormat(format!(
                "Invalid slot count: {}",
                slot_count
            )));
        }
        if item_count < 0 {
            return Err(IndexError::InvalidFormat(format!(
                "Invalid item count: {}",
                item_count
            )));
        }
        if end_timestamp < begin_timestamp {
            return Err(IndexError::InvalidFormat(format!(
                "End timestamp {} before begin timestamp {}",
                end_timestamp, begin_timestamp
            )));
        }

        Ok(Self {
            magic_code,
            begin_timestamp,
            end_timestamp,
            slot_count: slot_count as u32,
            item_count: item_count as u32,
        })
    }
}

/// Physical byte positions inside an index image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLayout {
    /// Number of hash slots
    pub slot_count: u32,
    /// Number of item records the image has room for
    pub item_capacity: u32,
}

impl IndexLayout {
    /// Create a layout
    pub fn new(slot_count: u32, item_capacity: u32) -> Self {
        Self {
            slot_count,
            item_capacity,
        }
    }

    /// Byte offset of slot `slot`
    pub fn slot_position(&self, slot: u32) -> u64 {
        HEADER_SIZE as u64 + slot as u64 * HASH_SLOT_SIZE as u64
    }

    /// Byte offset of item `index`
    pub fn item_position(&self, index: u32) -> u64 {
        self.items_start() + index as u64 * ITEM_SIZE as u64
    }

    /// Byte offset where the item table begins
    pub fn items_start(&self) -> u64 {
        self.slot_position(self.slot_count)
    }

    /// Total image size in bytes
    pub fn image_size(&self) -> u64 {
        self.item_position(self.item_capacity)
    }

    /// Derive the layout of an image of `len` bytes holding `slot_count` slots
    pub fn from_image_len(slot_count: u32, len: u64) -> Result<Self> {
        let items_start = Self::new(slot_count, 0).items_start();
        if len < items_start {
            return Err(IndexError::InvalidFormat(format!(
                "Truncated slot table: image of {} bytes, slots end at {}",
                len, items_start
            )));
        }

        let items_len = len - items_start;
        if items_len % ITEM_SIZE as u64 != 0 {
            return Err(IndexError::InvalidFormat(format!(
                "Item table of {} bytes is not a multiple of {}",
                items_len, ITEM_SIZE
            )));
        }

        let item_capacity = u32::try_from(items_len / ITEM_SIZE as u64).map_err(|_| {
            IndexError::InvalidFormat(format!("Item table of {} bytes too large", items_len))
        })?;

        Ok(Self::new(slot_count, item_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn header() -> IndexHeader {
        IndexHeader {
            magic_code: BEGIN_MAGIC_CODE,
            begin_timestamp: 1_000,
            end_timestamp: 5_000,
            slot_count: 5,
            item_count: 3,
        }
    }

    #[test]
    fn test_header_constants() {
        assert_eq!(MAGIC_CODE_OFFSET, 0);
        assert_eq!(BEGIN_TIMESTAMP_OFFSET, 4);
        assert_eq!(END_TIMESTAMP_OFFSET, 12);
        assert_eq!(SLOT_COUNT_OFFSET, 20);
        assert_eq!(ITEM_COUNT_OFFSET, 24);
        assert_eq!(HEADER_SIZE, 28);

        assert_eq!(BEGIN_MAGIC_CODE, -1127939447);
        assert_eq!(END_MAGIC_CODE, -1127939451);
    }

    #[test]
    fn test_header_field_offsets() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let at = |off: usize, len: usize| &buf[off..off + len];
        assert_eq!(at(MAGIC_CODE_OFFSET, 4), &BEGIN_MAGIC_CODE.to_be_bytes()[..]);
        assert_eq!(at(BEGIN_TIMESTAMP_OFFSET, 8), &1_000i64.to_be_bytes()[..]);
        assert_eq!(at(END_TIMESTAMP_OFFSET, 8), &5_000i64.to_be_bytes()[..]);
        assert_eq!(at(SLOT_COUNT_OFFSET, 4), &5i32.to_be_bytes()[..]);
        assert_eq!(at(ITEM_COUNT_OFFSET, 4), &3i32.to_be_bytes()[..]);

        assert_eq!(IndexHeader::decode(&buf).unwrap(), header());
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);

        // Truncated
        assert!(IndexHeader::decode(&buf[..HEADER_SIZE - 1]).unwrap_err().is_corruption());

        // Bad magic
        let mut bad = buf.clone();
        bad[0] ^= 0xFF;
        assert!(IndexHeader::decode(&bad).unwrap_err().is_corruption());

        // Zero slots
        let mut bad = buf.clone();
        bad[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 4].copy_from_slice(&0i32.to_be_bytes());
        assert!(IndexHeader::decode(&bad).is_err());

        // End before begin
        let mut bad = buf.clone();
        bad[END_TIMESTAMP_OFFSET..END_TIMESTAMP_OFFSET + 8].copy_from_slice(&10i64.to_be_bytes());
        assert!(IndexHeader::decode(&bad).is_err());
    }

    #[test]
    fn test_status_from_magic() {
        assert_eq!(header().status(), IndexStatus::Unsealed);
        let sealed = IndexHeader {
            magic_code: IndexHeader::magic_for(IndexStatus::Sealed),
            ..header()
        };
        assert_eq!(sealed.status(), IndexStatus::Sealed);
    }

    #[test]
    fn test_layout_positions() {
        let layout = IndexLayout::new(5, 20);
        let header_size = HEADER_SIZE as u64;

        assert_eq!(layout.slot_position(2), header_size + 8 * 2);
        assert_eq!(layout.slot_position(5), header_size + 8 * 5);
        assert_eq!(layout.item_position(2), header_size + 8 * 5 + 32 * 2);
        assert_eq!(layout.item_position(5), header_size + 8 * 5 + 32 * 5);
        assert_eq!(layout.image_size(), header_size + 8 * 5 + 32 * 20);
    }

    #[test]
    fn test_layout_from_image_len() {
        let layout = IndexLayout::new(5, 20);
        assert_eq!(IndexLayout::from_image_len(5, layout.image_size()).unwrap(), layout);
        assert_eq!(IndexLayout::from_image_len(5, 68).unwrap().item_capacity, 0);

        assert!(IndexLayout::from_image_len(5, 60).is_err());
        assert!(IndexLayout::from_image_len(5, layout.image_size() - 1).is_err());
    }
}
