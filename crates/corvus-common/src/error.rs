//! Error types for CorvusDB.

use thiserror::Error;

/// Result type alias using CorvusError.
pub type Result<T> = std::result::Result<T, CorvusError>;

/// Errors that can occur in CorvusDB operations.
#[derive(Debug, Error)]
pub enum CorvusError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Record not found at {rid}")]
    RecordNotFound { rid: String },

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    // Index errors
    #[error("Duplicate key in unique index")]
    DuplicateKey,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Index entry not found")]
    IndexEntryNotFound,

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    // Type errors
    #[error("Incompatible type: expected {expected}, got {actual}")]
    IncompatibleType { expected: String, actual: String },

    #[error("Invalid value count: expected {expected}, got {actual}")]
    InvalidValueCount { expected: usize, actual: usize },

    // Transaction errors
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    // Catalog errors
    #[error("Database already exists: {0}")]
    DatabaseExists(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: CorvusError = io_err.into();
        assert!(matches!(err, CorvusError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = CorvusError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = CorvusError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_type_errors_display() {
        let err = CorvusError::IncompatibleType {
            expected: "INT".to_string(),
            actual: "STRING".to_string(),
        };
        assert_eq!(err.to_string(), "Incompatible type: expected INT, got STRING");

        let err = CorvusError::InvalidValueCount {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Invalid value count: expected 3, got 2");
    }

    #[test]
    fn test_index_errors_display() {
        let err = CorvusError::DuplicateKey;
        assert_eq!(err.to_string(), "Duplicate key in unique index");

        let err = CorvusError::IndexEntryNotFound;
        assert_eq!(err.to_string(), "Index entry not found");

        let err = CorvusError::KeyTooLarge { size: 512, max: 256 };
        assert_eq!(err.to_string(), "Key too large: 512 bytes (max 256)");
    }

    #[test]
    fn test_catalog_errors_display() {
        let err = CorvusError::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "Table not found: users");

        let err = CorvusError::TableExists("orders".to_string());
        assert_eq!(err.to_string(), "Table already exists: orders");

        let err = CorvusError::DatabaseExists("db1".to_string());
        assert_eq!(err.to_string(), "Database already exists: db1");

        let err = CorvusError::IndexExists("users_id.idx".to_string());
        assert_eq!(err.to_string(), "Index already exists: users_id.idx");

        let err = CorvusError::ColumnNotFound("email".to_string());
        assert_eq!(err.to_string(), "Column not found: email");
    }

    #[test]
    fn test_transaction_aborted_display() {
        let err = CorvusError::TransactionAborted("lock denied".to_string());
        assert_eq!(err.to_string(), "Transaction aborted: lock denied");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(CorvusError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CorvusError>();
    }
}
