//! Store implementation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The technology family behind a store.
///
/// The kind is fixed when a store is registered and selects the native
/// query language the query builder renders for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Transactional SQL database.
    Relational,
    /// Blob store addressed by object key.
    ObjectStorage,
    /// Document search index.
    SearchIndex,
}

impl StoreKind {
    /// All kinds, in a stable order.
    pub const ALL: [StoreKind; 3] = [
        StoreKind::Relational,
        StoreKind::ObjectStorage,
        StoreKind::SearchIndex,
    ];

    /// Returns the kind's configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StoreKind::Relational => "relational",
            StoreKind::ObjectStorage => "object_storage",
            StoreKind::SearchIndex => "search_index",
        }
    }

    /// Returns true for stores that speak SQL.
    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(self, StoreKind::Relational)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
