//! Error types for HeapSync
//!
//! This module defines all error types used throughout the crate,
//! providing detailed error information for debugging and user feedback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for HeapSync operations
#[derive(Error, Debug)]
pub enum HeapSyncError {
    /// I/O error during local file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bucket, prefix or object could not be reached
    #[error("Not found: {0}")]
    NotFound(String),

    /// A document fetched from the blob store is not valid JSON for its schema
    #[error("Failed to parse '{key}': {message}")]
    Parse { key: String, message: String },

    /// A data file path does not follow `sync_<dump_id>/<table>/part-<n>-...`
    #[error("Malformed file name: {0}")]
    MalformedFileName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A data file could not be decoded into rows
    #[error("Failed to decode '{path}': {message}")]
    Decode { path: String, message: String },

    /// Blob store request failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Output sink failed to write a record or state message
    #[error("Sink error: {0}")]
    Sink(String),

    /// A persisted checkpoint token could not be interpreted
    #[error("Invalid checkpoint token '{0}'")]
    InvalidCheckpoint(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<HeapSyncError>,
    },
}

impl HeapSyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error for a blob key
    pub fn parse(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error for a data file
    pub fn decode(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Storage(_) => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Result type alias for HeapSync operations
pub type Result<T> = std::result::Result<T, HeapSyncError>;

impl From<std::io::Error> for HeapSyncError {
    fn from(err: std::io::Error) -> Self {
        HeapSyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for HeapSyncError {
    fn from(err: serde_json::Error) -> Self {
        HeapSyncError::Sink(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| HeapSyncError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let result: Result<()> = Err(io_err).with_path("/tmp/file_123.avro");
        match result {
            Err(HeapSyncError::Io { path, .. }) => {
                assert_eq!(path, PathBuf::from("/tmp/file_123.avro"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_recoverability() {
        assert!(HeapSyncError::Storage("timeout".into()).is_recoverable());
        assert!(HeapSyncError::Storage("timeout".into())
            .with_context("head sync_1/users/part-0.avro")
            .is_recoverable());
        assert!(!HeapSyncError::MalformedFileName("x".into()).is_recoverable());
        assert!(!HeapSyncError::config("bucket").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = HeapSyncError::MalformedFileName("orders/part-0.avro".into());
        assert_eq!(err.to_string(), "Malformed file name: orders/part-0.avro");
    }
}
