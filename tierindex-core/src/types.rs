//! Core types for tierindex

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Lifecycle status of an index file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexStatus {
    /// Accepting writes
    Unsealed,
    /// Immutable, ready to be uploaded or evicted
    Sealed,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Unsealed => write!(f, "UNSEALED"),
            IndexStatus::Sealed => write!(f, "SEALED"),
        }
    }
}

/// Where an indexed message lives in the underlying log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageLocation {
    /// Numeric topic id
    pub topic_id: i32,
    /// Queue within the topic
    pub queue_id: i32,
    /// Physical offset in the log
    pub offset: i64,
    /// Message size in bytes
    pub size: i32,
}

impl MessageLocation {
    /// Create a new location
    pub fn new(topic_id: i32, queue_id: i32, offset: i64, size: i32) -> Self {
        Self {
            topic_id,
            queue_id,
            offset,
            size,
        }
    }

    /// Location carrying only a physical offset
    pub fn at_offset(offset: i64) -> Self {
        Self {
            offset,
            ..Default::default()
        }
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }
}
