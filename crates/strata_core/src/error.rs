//! Error types for the entity persistence engine.

use std::fmt;
use strata_storage::{StorageError, StoreKind};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Offending field, or `state` for lifecycle violations.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl Violation {
    /// Creates a violation.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in entity persistence operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store or entity metadata is missing or inconsistent.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The entity failed validation; no store was called.
    #[error("validation failed for {entity_type} {key}: {}", join_violations(.violations))]
    Validation {
        /// Entity type.
        entity_type: String,
        /// Rendered key, or `?` when the key itself is invalid.
        key: String,
        /// Every violation found.
        violations: Vec<Violation>,
    },

    /// A native store call failed.
    #[error("persistence failed for {entity_type} {key} on store {store}: {source}")]
    Persistence {
        /// Entity type.
        entity_type: String,
        /// Rendered key.
        key: String,
        /// Store name.
        store: String,
        /// Native failure.
        source: StorageError,
    },

    /// A reference could not be resolved or cascaded.
    #[error("reference {entity_type}.{field} via store {store}: {message}")]
    ReferenceResolution {
        /// Source entity type.
        entity_type: String,
        /// Reference field.
        field: String,
        /// Target store name, or `?` when no store could be resolved.
        store: String,
        /// Description of the failure.
        message: String,
        /// Underlying failure, if any.
        source: Option<Box<CoreError>>,
    },

    /// Invalid transaction context transition.
    #[error("transaction ({root_type}, {kind}): {message}")]
    Transaction {
        /// Root entity type of the unit of work.
        root_type: String,
        /// Store kind of the context.
        kind: StoreKind,
        /// Description of the failure.
        message: String,
    },

    /// Some stores committed before another failed.
    #[error("partial commit for {root_type}: committed {committed:?} before {failed_store} failed: {source}")]
    PartialCommit {
        /// Root entity type of the unit of work.
        root_type: String,
        /// Stores that committed, in commit order.
        committed: Vec<String>,
        /// Store whose commit failed.
        failed_store: String,
        /// The failure.
        source: Box<CoreError>,
    },

    /// A predicate is malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// A native connection could not be obtained.
    #[error("connection to store {store} failed: {message}")]
    Connection {
        /// Store name.
        store: String,
        /// Description of the failure.
        message: String,
    },

    /// A row could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(
        root_type: impl Into<String>,
        kind: StoreKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Transaction {
            root_type: root_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(
        entity_type: impl Into<String>,
        key: impl Into<String>,
        store: impl Into<String>,
        source: StorageError,
    ) -> Self {
        Self::Persistence {
            entity_type: entity_type.into(),
            key: key.into(),
            store: store.into(),
            source,
        }
    }

    /// Creates a reference resolution error.
    pub fn reference(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        store: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ReferenceResolution {
            entity_type: entity_type.into(),
            field: field.into(),
            store: store.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps this error as the cause of a reference resolution failure.
    #[must_use]
    pub fn into_reference(self, entity_type: &str, field: &str, store: &str) -> Self {
        let already = matches!(
            &self,
            Self::ReferenceResolution { entity_type: et, field: f, .. }
                if et == entity_type && f == field
        );
        if already {
            return self;
        }
        Self::ReferenceResolution {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            store: store.to_string(),
            message: self.to_string(),
            source: Some(Box::new(self)),
        }
    }

    /// Returns true for validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true for transaction state failures.
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }

    /// Returns the validation violations, if this is a validation failure.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation { violations, .. } => violations,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_violation() {
        let err = CoreError::Validation {
            entity_type: "Order".into(),
            key: "(orderId=1)".into(),
            violations: vec![
                Violation::new("customer", "is required"),
                Violation::new("state", "Unknown entities cannot be persisted"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("customer: is required"));
        assert!(text.contains("state: Unknown"));
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn reference_wrapping_keeps_cause() {
        let cause = CoreError::connection("items-search", "pool exhausted");
        let err = cause.into_reference("Order", "items", "items-search");
        match &err {
            CoreError::ReferenceResolution { source, field, .. } => {
                assert_eq!(field, "items");
                assert!(source.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn rewrapping_same_reference_is_identity() {
        let err = CoreError::reference("Order", "items", "items-search", "bad join");
        let again = err.into_reference("Order", "items", "items-search");
        assert!(matches!(
            again,
            CoreError::ReferenceResolution { source: None, .. }
        ));
    }
}
