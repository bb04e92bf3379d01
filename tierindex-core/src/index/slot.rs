//! Hash slot table

use super::header::HASH_SLOT_SIZE;
use crate::{IndexError, Result};
use bytes::{Buf, BufMut};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicI64, Ordering};

/// Head value of a slot with no items
pub const EMPTY_SLOT: i64 = -1;

/// Upper bound on writer lock stripes
const MAX_LOCK_STRIPES: u32 = 64;

/// Fixed array of chain heads, one per hash slot
///
/// Heads are published with Release and read with Acquire. Writers to the
/// same slot serialize on a striped lock so that the head a writer links to
/// is always older than the item it publishes.
pub struct HashSlotTable {
    heads: Box<[AtomicI64]>,
    stripes: Box<[Mutex<()>]>,
}

impl HashSlotTable {
    /// Create a table of `slot_count` empty slots
    pub fn new(slot_count: u32) -> Self {
        Self::from_heads((0..slot_count).map(|_| EMPTY_SLOT))
    }

    fn from_heads(heads: impl Iterator<Item = i64>) -> Self {
        let heads: Box<[AtomicI64]> = heads.map(AtomicI64::new).collect();
        let stripe_count = (heads.len() as u32).clamp(1, MAX_LOCK_STRIPES);
        let stripes = (0..stripe_count).map(|_| Mutex::new(())).collect();
        Self { heads, stripes }
    }

    /// Decode `slot_count` big-endian heads from `data`
    pub fn decode(data: &[u8], slot_count: u32) -> Result<Self> {
        let needed = slot_count as usize * HASH_SLOT_SIZE;
        if data.len() < needed {
            return Err(IndexError::InvalidFormat(format!(
                "Truncated slot table: {} of {} bytes",
                data.len(),
                needed
            )));
        }

        let mut cursor = &data[..needed];
        Ok(Self::from_heads((0..slot_count).map(|_| cursor.get_i64())))
    }

    /// Number of slots
    pub fn len(&self) -> u32 {
        self.heads.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Current head of `slot`, [`EMPTY_SLOT`] when the chain is empty
    pub fn read(&self, slot: u32) -> i64 {
        self.heads[slot as usize].load(Ordering::Acquire)
    }

    /// Publish `item_index` as the new head of `slot`
    pub fn write(&self, slot: u32, item_index: u32) {
        self.heads[slot as usize].store(item_index as i64, Ordering::Release);
    }

    /// Writer lock covering `slot`
    pub fn lock(&self, slot: u32) -> MutexGuard<'_, ()> {
        let stripe = slot as usize % self.stripes.len();
        self.stripes[stripe].lock()
    }

    /// Append every head, big-endian, to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        for head in self.heads.iter() {
            buf.put_i64(head.load(Ordering::Acquire));
        }
    }

    /// Index of the first slot whose head is neither empty nor below `item_count`
    pub fn find_dangling(&self, item_count: u32) -> Option<(u32, i64)> {
        self.heads
            .iter()
            .map(|head| head.load(Ordering::Acquire))
            .enumerate()
            .find(|(_, head)| *head != EMPTY_SLOT && !(0..item_count as i64).contains(head))
            .map(|(slot, head)| (slot as u32, head))
    }
}
