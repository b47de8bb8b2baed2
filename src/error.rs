//! Error types for BucketSync
//!
//! Two layers of errors live here:
//! - [`StorageError`] is what the storage collaborators (filesystem, object
//!   stores) report for a single call.
//! - [`SyncError`] is what a sync run reports to its caller. It classifies the
//!   failure (enumeration, transfer, cancellation, configuration) so callers can
//!   treat a user-initiated stop differently from a real fault.

use std::path::PathBuf;
use thiserror::Error;

/// Error reported by a storage collaborator call
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error during a filesystem operation
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Object or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote service rejected or failed the request
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// Operation is not supported by this store
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Key cannot be mapped onto a local path
    #[error("Invalid key for a local path: '{0}'")]
    InvalidKey(String),

    /// Listing produced keys out of ascending order
    #[error("Listing out of order: '{key}' after '{previous}'")]
    OutOfOrder { previous: String, key: String },
}

impl StorageError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}

/// A multipart session failed while uploading or finalizing
#[derive(Error, Debug)]
#[error("multipart upload {upload_id} failed at {stage}: {source}")]
pub struct MultipartError {
    /// Session identifier returned by the store
    pub upload_id: String,
    /// Which step failed
    pub stage: MultipartStage,
    /// Underlying collaborator error
    #[source]
    pub source: StorageError,
}

/// Step of a multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartStage {
    /// Reading or uploading the given part (1-based)
    Part(u32),
    /// Submitting the ordered part list
    Complete,
}

impl std::fmt::Display for MultipartStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Part(n) => write!(f, "part {}", n),
            Self::Complete => write!(f, "completion"),
        }
    }
}

/// Why a single transfer operation failed
#[derive(Error, Debug)]
pub enum TransferCause {
    /// A single collaborator call failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A multipart session failed and was aborted
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

/// Main error type for sync runs
#[derive(Error, Debug)]
pub enum SyncError {
    /// Listing or walking a collection failed; the whole run is aborted
    #[error("Failed to enumerate '{collection}': {source}")]
    Enumeration {
        collection: String,
        #[source]
        source: StorageError,
    },

    /// A put/get/copy/delete for one key failed
    #[error("Transfer of '{key}' failed: {source}")]
    Transfer {
        key: String,
        #[source]
        source: TransferCause,
    },

    /// Run was stopped through the transfer monitor
    #[error("Sync cancelled")]
    Cancelled,

    /// Invalid option combination, detected before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// Collection address could not be parsed
    #[error("Invalid collection address: {0}")]
    InvalidAddress(String),
}

impl SyncError {
    /// Create an enumeration error
    pub fn enumeration(collection: impl Into<String>, source: StorageError) -> Self {
        Self::Enumeration {
            collection: collection.into(),
            source,
        }
    }

    /// Create a transfer error for `key`
    pub fn transfer(key: impl Into<String>, source: impl Into<TransferCause>) -> Self {
        Self::Transfer {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this error is a user-initiated cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error came from a single failed operation
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    /// Check if the run was rejected before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidAddress(_))
    }

    /// Get the object key associated with this error, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Transfer { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type alias for sync runs
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for storage collaborator calls
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> StorageResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> StorageResult<T> {
        self.map_err(|e| StorageError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageResult<()> = Err(io_err).with_path("/test/path");
        match err {
            Err(StorageError::Io { path, .. }) => assert_eq!(path, PathBuf::from("/test/path")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(SyncError::Cancelled.is_cancellation());
        assert!(!SyncError::Cancelled.is_transfer_failure());

        let err = SyncError::transfer("a/b.txt", StorageError::remote("boom"));
        assert!(err.is_transfer_failure());
        assert_eq!(err.key(), Some("a/b.txt"));

        assert!(SyncError::config("bad").is_configuration());
        assert!(SyncError::InvalidAddress("s3://".into()).is_configuration());
    }

    #[test]
    fn test_multipart_error_is_transfer() {
        let err = SyncError::transfer(
            "big.bin",
            MultipartError {
                upload_id: "u-1".to_string(),
                stage: MultipartStage::Part(3),
                source: StorageError::remote("timeout"),
            },
        );
        assert!(err.is_transfer_failure());
        let message = err.to_string();
        assert!(message.contains("big.bin"));
        assert!(message.contains("part 3"));
    }
}
