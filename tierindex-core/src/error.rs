//! Error types for tierindex

use thiserror::Error;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Index file error types
#[derive(Error, Debug)]
pub enum IndexError {
    /// IO operation failed in the backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic code, truncated image or a broken structural invariant
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// The item log cannot take more entries
    #[error("Index file full: capacity of {capacity} items exhausted")]
    CapacityExceeded { capacity: u32 },

    /// Mutation attempted on a sealed file
    #[error("Index file is sealed")]
    Sealed,

    /// Timestamp too far from the file's begin timestamp to be stored
    #[error("Timestamp {timestamp} out of range for index file starting at {begin}")]
    TimestampOutOfRange { timestamp: i64, begin: i64 },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The file has been shut down and its tables released
    #[error("Index file has been shut down")]
    Closed,
}

impl IndexError {
    /// Check if the caller can continue by rotating to a new index file
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IndexError::CapacityExceeded { .. }
                | IndexError::Sealed
                | IndexError::TimestampOutOfRange { .. }
        )
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::InvalidFormat(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(IndexError::CapacityExceeded { capacity: 20 }.is_recoverable());
        assert!(IndexError::Sealed.is_recoverable());
        assert!(IndexError::TimestampOutOfRange { timestamp: 0, begin: 1 }.is_recoverable());
        assert!(!IndexError::Closed.is_recoverable());

        let io = IndexError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_recoverable());
        assert!(!io.is_corruption());

        assert!(IndexError::InvalidFormat("bad magic".into()).is_corruption());
    }
}
