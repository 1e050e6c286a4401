use std::time::Duration;

use thiserror::Error;

/// Errors raised by the document store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode envelope encoding errors.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Wrapper around JSON body encoding errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when a referenced document is absent.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The query needs a composite index that has not been declared.
    #[error("query on {collection} requires a composite index over [{fields}]")]
    MissingIndex { collection: String, fields: String },

    /// A write batch already holds the maximum number of operations.
    #[error("write batch is full ({limit} operations)")]
    BatchFull { limit: usize },

    /// Collection or document id that cannot be mapped to a key.
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    /// Document exists but does not decode into the expected record type.
    #[error("malformed {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    /// Returned when decoding a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Concurrent writer touched a document read by the running transaction.
    #[error("transaction conflict")]
    TransactionConflict,

    /// Backend temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not finish within the configured deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Failures worth answering with a stale cache entry instead of an error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Sled(_)
                | StoreError::Unavailable(_)
                | StoreError::Timeout(_)
                | StoreError::TransactionConflict
        )
    }
}

impl From<sled::transaction::UnabortableTransactionError> for StoreError {
    fn from(err: sled::transaction::UnabortableTransactionError) -> Self {
        match err {
            sled::transaction::UnabortableTransactionError::Conflict => {
                StoreError::TransactionConflict
            }
            sled::transaction::UnabortableTransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}
