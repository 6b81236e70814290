//! Native connection and driver traits.

use crate::config::ConnectionConfig;
use crate::error::StorageResult;
use crate::kind::StoreKind;
use crate::layout::CollectionLayout;
use crate::query::{NativeQuery, RowKey};
use std::sync::Arc;
use strata_codec::Row;

/// One native connection to a store.
///
/// Connections are **exclusively owned**: a connection is checked out of a
/// pool by one unit of work and is never shared while checked out, so the
/// trait requires `Send` but not `Sync`.
///
/// # Invariants
///
/// - Writes issued outside `begin`/`commit` take effect immediately
/// - Writes issued inside a transaction are visible to reads on the same
///   connection before commit, and discarded by `rollback`
/// - `insert` never overwrites; `update` never creates
pub trait NativeConnection: Send {
    /// The store kind this connection speaks to.
    fn kind(&self) -> StoreKind;

    /// Provisions a collection (table, key namespace, index mapping).
    ///
    /// Idempotent.
    fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()>;

    /// Starts a native transaction.
    fn begin(&mut self) -> StorageResult<()>;

    /// Commits the native transaction.
    fn commit(&mut self) -> StorageResult<()>;

    /// Discards the native transaction.
    fn rollback(&mut self) -> StorageResult<()>;

    /// Returns true while a native transaction is open.
    fn in_transaction(&self) -> bool;

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if a row with the same key exists.
    fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()>;

    /// Replaces an existing row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row has the key.
    fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()>;

    /// Deletes a row, returning whether it existed.
    fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool>;

    /// Reads one row by key.
    fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>>;

    /// Executes a query written in this store's native language.
    fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>>;

    /// Cheap health check run before a pooled connection is reused.
    fn is_valid(&mut self) -> bool;

    /// Releases the native handle. Further calls fail with `Closed`.
    fn close(&mut self) -> StorageResult<()>;
}

/// Opens native connections for one store kind.
///
/// A driver is the "implementation class" of a store: it is chosen when
/// the store is registered and never changes afterwards.
pub trait Driver: Send + Sync {
    /// The store kind this driver connects to.
    fn kind(&self) -> StoreKind;

    /// Opens a new native connection.
    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Box<dyn NativeConnection>>;
}

/// Returns the built-in driver for a store kind.
#[must_use]
pub fn default_driver(kind: StoreKind) -> Arc<dyn Driver> {
    match kind {
        StoreKind::Relational => Arc::new(crate::sqlite::SqliteDriver::new()),
        StoreKind::ObjectStorage => Arc::new(crate::object::ObjectStoreDriver::new()),
        StoreKind::SearchIndex => Arc::new(crate::search::SearchIndexDriver::new()),
    }
}
