//! Composite key construction and slot hashing
//!
//! Hash values are persisted inside index items, so the function must stay
//! identical across processes and releases. It reproduces the 32-bit
//! polynomial string hash (`h = 31 * h + c` over UTF-16 code units) used by
//! files written by existing deployments.

/// Separator placed between topic and key
pub const KEY_SEPARATOR: char = '#';

/// Builds composite keys and maps them onto hash slots
pub struct KeyHasher;

impl KeyHasher {
    /// Build the composite lookup key for a topic and message key
    pub fn build_key(topic: &str, key: &str) -> String {
        let mut composite = String::with_capacity(topic.len() + key.len() + 1);
        composite.push_str(topic);
        composite.push(KEY_SEPARATOR);
        composite.push_str(key);
        composite
    }

    /// Stable, non-negative hash of a composite key
    ///
    /// `i32::MIN` has no positive counterpart and is kept as is, matching the
    /// values already stored in existing files; [`KeyHasher::slot_index`]
    /// handles it.
    pub fn hash_code(composite: &str) -> i32 {
        let hash = composite
            .encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
        hash.wrapping_abs()
    }

    /// Map a key hash onto a slot in `[0, slot_count)`
    pub fn slot_index(hash: i32, slot_count: u32) -> u32 {
        debug_assert!(slot_count > 0);
        hash.unsigned_abs() % slot_count
    }

    /// Hash and slot for a (topic, key) pair
    pub fn locate(topic: &str, key: &str, slot_count: u32) -> (i32, u32) {
        let hash = Self::hash_code(&Self::build_key(topic, key));
        (hash, Self::slot_index(hash, slot_count))
    }
}
