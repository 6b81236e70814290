//! Connection pool.
//!
//! Each store keeps a bounded set of native connections. [`ConnectionPool::acquire`]
//! hands one out wrapped in a [`PooledConnection`] guard that returns it
//! on drop, so a connection is released on every exit path, including
//! early returns through `?`. When a store is exhausted the pool either
//! blocks until the acquire timeout or fails fast, per the store's
//! [`PoolPolicy`].

use crate::error::{CoreError, CoreResult};
use crate::registry::StoreHandle;
use crate::stats::{PoolStats, PoolStatsSnapshot};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use strata_codec::{Row, Value};
use strata_storage::{
    CollectionLayout, ConnectionConfig, NativeConnection, NativeQuery, PoolPolicy, RowKey,
    StorageError, StorageResult, StoreKind,
};
use tracing::{debug, warn};

#[derive(Default)]
struct SlotState {
    idle: Vec<Box<dyn NativeConnection>>,
    open: usize,
    closed: bool,
}

/// The native connections of one store.
#[derive(Default)]
pub(crate) struct Slots {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Slots")
            .field("idle", &state.idle.len())
            .field("open", &state.open)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Slots {
    fn give_back(&self, mut conn: Box<dyn NativeConnection>, stats: &PoolStats) {
        let mut state = self.state.lock();
        stats.record_released();
        if state.closed || !conn.is_valid() {
            state.open = state.open.saturating_sub(1);
            if let Err(e) = conn.close() {
                warn!(error = %e, "failed to close native connection");
            }
            stats.record_closed();
        } else {
            state.idle.push(conn);
        }
        self.available.notify_one();
    }

    /// Marks the store closed and closes idle connections. Returns how
    /// many were closed.
    pub(crate) fn close(&self, stats: &PoolStats) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        let count = idle.len();
        for mut conn in idle {
            if let Err(e) = conn.close() {
                warn!(error = %e, "failed to close native connection");
            }
            stats.record_closed();
        }
        state.open = state.open.saturating_sub(count);
        self.available.notify_all();
        count
    }
}

/// A checked-out native connection.
///
/// Native calls made through the guard are counted in the store's
/// statistics. Dropping the guard returns the connection to its store;
/// a connection returned with an open native transaction is rolled back
/// first.
pub struct PooledConnection {
    store: StoreHandle,
    conn: Option<Box<dyn NativeConnection>>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("store", &self.store.name())
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl PooledConnection {
    /// The store this connection belongs to.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// The store kind.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.store.kind()
    }

    fn call<T>(
        &mut self,
        f: impl FnOnce(&mut dyn NativeConnection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.conn.as_deref_mut().ok_or(StorageError::Closed)?;
        let result = f(conn);
        if result.is_err() {
            self.store.stats.record_error();
        }
        result
    }

    /// Provisions a collection.
    pub fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()> {
        self.call(|c| c.ensure_collection(layout))
    }

    /// Starts a native transaction.
    pub fn begin(&mut self) -> StorageResult<()> {
        self.call(|c| c.begin())?;
        self.store.stats.record_begin();
        Ok(())
    }

    /// Commits the native transaction.
    pub fn commit(&mut self) -> StorageResult<()> {
        self.call(|c| c.commit())?;
        self.store.stats.record_commit();
        Ok(())
    }

    /// Rolls the native transaction back.
    pub fn rollback(&mut self) -> StorageResult<()> {
        self.call(|c| c.rollback())?;
        self.store.stats.record_rollback();
        Ok(())
    }

    /// Returns true while a native transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.in_transaction())
    }

    /// Inserts a row.
    pub fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.store.stats.record_insert();
        self.call(|c| c.insert(collection, key, row))
    }

    /// Updates a row.
    pub fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.store.stats.record_update();
        self.call(|c| c.update(collection, key, row))
    }

    /// Deletes a row.
    pub fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        self.store.stats.record_delete();
        self.call(|c| c.delete(collection, key))
    }

    /// Reads a row by key.
    pub fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.store.stats.record_read();
        self.call(|c| c.get(collection, key))
    }

    /// Executes a native query.
    pub fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>> {
        self.store.stats.record_query();
        self.call(|c| c.query(query))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if conn.in_transaction() {
            warn!(store = %self.store.name(), "connection released inside a transaction; rolling back");
            match conn.rollback() {
                Ok(()) => self.store.stats.record_rollback(),
                Err(e) => warn!(store = %self.store.name(), error = %e, "rollback on release failed"),
            }
        }
        self.store.slots.give_back(conn, &self.store.pool_stats);
    }
}

/// A store description read from a catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredStore {
    /// Name to register the store under.
    pub name: String,
    /// Store kind.
    pub kind: StoreKind,
    /// Connection parameters.
    pub config: ConnectionConfig,
}

/// A catalogue record describing one store connection.
pub trait CatalogueEntry: Sized {
    /// Parses a catalogue row.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed rows.
    fn from_row(row: &Row) -> CoreResult<Self>;

    /// Name to register the store under.
    fn store_name(&self) -> String;

    /// Connection parameters of the store.
    fn connection(&self) -> ConnectionConfig;
}

/// The default catalogue record: `name` and `location` columns, with an
/// optional `pool_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueRow {
    /// Store name.
    pub name: String,
    /// Driver location.
    pub location: String,
    /// Pool size override.
    pub pool_size: Option<usize>,
}

impl CatalogueEntry for CatalogueRow {
    fn from_row(row: &Row) -> CoreResult<Self> {
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_text)
                .map(str::to_string)
                .ok_or_else(|| CoreError::configuration(format!("catalogue row lacks {column}")))
        };
        let pool_size = match row.get("pool_size").and_then(Value::as_integer) {
            Some(n) => Some(usize::try_from(n).map_err(|_| {
                CoreError::configuration(format!("catalogue pool_size {n} is out of range"))
            })?),
            None => None,
        };
        Ok(Self {
            name: text("name")?,
            location: text("location")?,
            pool_size,
        })
    }

    fn store_name(&self) -> String {
        self.name.clone()
    }

    fn connection(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(self.location.clone());
        match self.pool_size {
            Some(size) => config.pool_size(size),
            None => config,
        }
    }
}

/// Hands out native connections per store.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    stats: Arc<PoolStats>,
}

impl ConnectionPool {
    /// Creates a pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stats_handle(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Pool counters across all stores.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Checks out a connection for a store.
    ///
    /// Idle connections are health-checked before reuse; a new one is
    /// opened while the store is below its pool size.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the store is closed, the driver fails
    /// to connect, or the pool stays exhausted (immediately under
    /// `FailFast`, after the acquire timeout under `Block`).
    pub fn acquire(&self, store: &StoreHandle) -> CoreResult<PooledConnection> {
        let config = store.config();
        let deadline = Instant::now() + config.acquire_timeout();
        let mut state = store.slots.state.lock();
        loop {
            if state.closed {
                return Err(CoreError::connection(store.name(), "store is closed"));
            }
            while let Some(mut conn) = state.idle.pop() {
                if conn.is_valid() {
                    self.stats.record_acquired();
                    return Ok(PooledConnection {
                        store: Arc::clone(store),
                        conn: Some(conn),
                    });
                }
                state.open = state.open.saturating_sub(1);
                if let Err(e) = conn.close() {
                    warn!(store = %store.name(), error = %e, "failed to close stale connection");
                }
                self.stats.record_closed();
                debug!(store = %store.name(), "discarded stale connection");
            }

            if state.open < config.pool_size {
                state.open += 1;
                drop(state);
                return match store.driver().connect(config) {
                    Ok(conn) => {
                        self.stats.record_created();
                        self.stats.record_acquired();
                        debug!(store = %store.name(), "opened native connection");
                        Ok(PooledConnection {
                            store: Arc::clone(store),
                            conn: Some(conn),
                        })
                    }
                    Err(e) => {
                        let mut state = store.slots.state.lock();
                        state.open = state.open.saturating_sub(1);
                        store.slots.available.notify_one();
                        Err(CoreError::connection(store.name(), e.to_string()))
                    }
                };
            }

            match config.pool_policy {
                PoolPolicy::FailFast => {
                    self.stats.record_exhausted();
                    return Err(CoreError::connection(
                        store.name(),
                        format!("pool exhausted ({} connections in use)", config.pool_size),
                    ));
                }
                PoolPolicy::Block => {
                    if store
                        .slots
                        .available
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        self.stats.record_exhausted();
                        warn!(store = %store.name(), "timed out waiting for a connection");
                        return Err(CoreError::connection(
                            store.name(),
                            format!(
                                "timed out after {} ms waiting for a connection",
                                config.acquire_timeout_ms
                            ),
                        ));
                    }
                }
            }
        }
    }

    /// Returns a connection to its store. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Reads store descriptions through a seed store.
    ///
    /// Runs `catalogue` on `seed`, parses each row as `C`, keeps the
    /// entries accepted by `filter`, and describes each as a store of
    /// `kind`. The seed connection is released on every path.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the catalogue query fails, or the
    /// entry's parse error.
    pub fn read_connections<C, F>(
        &self,
        seed: &StoreHandle,
        catalogue: &NativeQuery,
        kind: StoreKind,
        filter: F,
    ) -> CoreResult<Vec<DiscoveredStore>>
    where
        C: CatalogueEntry,
        F: Fn(&C) -> bool,
    {
        let rows = {
            let mut conn = self.acquire(seed)?;
            conn.query(catalogue).map_err(|e| {
                CoreError::connection(seed.name(), format!("catalogue query failed: {e}"))
            })?
        };
        let entries = rows
            .iter()
            .map(C::from_row)
            .collect::<CoreResult<Vec<C>>>()?;
        Ok(entries
            .into_iter()
            .filter(|entry| filter(entry))
            .map(|entry| DiscoveredStore {
                name: entry.store_name(),
                kind,
                config: entry.connection(),
            })
            .collect())
    }
}
