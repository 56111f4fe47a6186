//! Storage layer error types
//!
//! Defines all errors that can occur while opening and scanning log files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// MCAP record parsing failed (bad magic, truncated record, bad chunk)
    #[error("MCAP error in {path:?}: {message}")]
    Mcap { path: PathBuf, message: String },

    /// File has no summary section (writer has not finalized it)
    #[error("No summary section in {0:?}")]
    MissingSummary(PathBuf),

    /// Payload could not be decoded with the channel's encoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization of an output record failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid time window (start > end)
    #[error("Invalid time window: start must not be after end")]
    InvalidWindow,
}

impl StorageError {
    /// Wrap an MCAP parser error with the file it came from
    pub fn mcap(path: impl Into<PathBuf>, err: mcap::McapError) -> Self {
        StorageError::Mcap {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidWindow;
        assert_eq!(
            err.to_string(),
            "Invalid time window: start must not be after end"
        );

        let err = StorageError::Decode("bad json".to_string());
        assert_eq!(err.to_string(), "Decode error: bad json");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}
