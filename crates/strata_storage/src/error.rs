//! Error types for native store operations.

use crate::kind::StoreKind;
use thiserror::Error;

/// Result type for native store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to a native store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The SQLite driver reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// A row with the same key already exists.
    #[error("duplicate key {key} in {collection}")]
    DuplicateKey {
        /// Target collection.
        collection: String,
        /// Rendered key.
        key: String,
    },

    /// No row exists for the key.
    #[error("no row for key {key} in {collection}")]
    NotFound {
        /// Target collection.
        collection: String,
        /// Rendered key.
        key: String,
    },

    /// The collection was never provisioned on this store.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// The query representation does not belong to this store kind.
    #[error("{kind} store cannot execute {message}")]
    UnsupportedQuery {
        /// Kind of the store that rejected the query.
        kind: StoreKind,
        /// What was submitted.
        message: String,
    },

    /// The value or operation has no native representation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Begin/commit/rollback issued in the wrong state.
    #[error("invalid transaction state: {0}")]
    TransactionState(String),

    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// The connection parameters are unusable.
    #[error("invalid connection config: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState(message.into())
    }

    /// Creates an unsupported query error.
    pub fn unsupported_query(kind: StoreKind, message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            kind,
            message: message.into(),
        }
    }

    /// Returns true when the error is a key collision.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
