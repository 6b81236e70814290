//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_storage::StoreKind;

/// An entity lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Persist a new entity.
    Create,
    /// Replace a persisted entity.
    Update,
    /// Remove a persisted entity.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// How many target entities a reference binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One source, one target.
    OneToOne,
    /// One source, many targets.
    OneToMany,
    /// Many sources, one target.
    ManyToOne,
    /// Many sources, many targets.
    ManyToMany,
}

impl Cardinality {
    /// Returns true when the resolved value is a collection.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

/// Identifies a transaction context within a unit of work.
///
/// Contexts are keyed by root entity type and store kind rather than a
/// global transaction id: saving one aggregate may open independent
/// transactions against stores that cannot commit atomically together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxKey {
    /// Root entity type of the logical operation.
    pub root_type: String,
    /// Store kind the context talks to.
    pub kind: StoreKind,
}

impl TxKey {
    /// Creates a key.
    pub fn new(root_type: impl Into<String>, kind: StoreKind) -> Self {
        Self {
            root_type: root_type.into(),
            kind,
        }
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.root_type, self.kind)
    }
}
