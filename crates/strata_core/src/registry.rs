//! Store registry.
//!
//! The registry owns every registered [`Store`] for the lifetime of the
//! environment and answers "which store hosts this entity type". Stores
//! are resolved from a declarative mapping `entity type -> [StoreKind]`:
//! the first eligible kind that has a registered store wins, and among
//! stores of that kind the earliest registered one is chosen.

use crate::error::{CoreError, CoreResult};
use crate::pool::{ConnectionPool, DiscoveredStore, Slots};
use crate::stats::{PoolStats, StoreStats, StoreStatsSnapshot};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strata_storage::{default_driver, ConnectionConfig, Driver, StoreKind};
use tracing::{debug, info};

/// Shared handle to a registered store.
pub type StoreHandle = Arc<Store>;

/// A registered store: a name, a fixed implementation kind, and the
/// native connections opened for it.
pub struct Store {
    name: String,
    kind: StoreKind,
    config: ConnectionConfig,
    driver: Arc<dyn Driver>,
    pub(crate) slots: Slots,
    pub(crate) stats: StoreStats,
    pub(crate) pool_stats: Arc<PoolStats>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("location", &self.config.location)
            .finish()
    }
}

impl Store {
    /// Store name, unique within the environment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Implementation kind.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Connection parameters.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Native call counters.
    #[must_use]
    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }
}

/// Registered stores and the entity-type mapping.
#[derive(Debug)]
pub struct StoreRegistry {
    stores: RwLock<Vec<StoreHandle>>,
    mappings: BTreeMap<String, Vec<StoreKind>>,
    pool_stats: Arc<PoolStats>,
}

impl StoreRegistry {
    /// Creates an empty registry whose stores report to `pool`'s counters.
    #[must_use]
    pub fn new(mappings: BTreeMap<String, Vec<StoreKind>>, pool: &ConnectionPool) -> Self {
        Self {
            stores: RwLock::new(Vec::new()),
            mappings,
            pool_stats: pool.stats_handle(),
        }
    }

    /// Registers a store using the built-in driver for its kind.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is taken or empty, or the
    /// pool size is zero.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: StoreKind,
        config: ConnectionConfig,
    ) -> CoreResult<StoreHandle> {
        self.register_with_driver(name, default_driver(kind), config)
    }

    /// Registers a store served by a caller-supplied driver.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_with_driver(
        &self,
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
        config: ConnectionConfig,
    ) -> CoreResult<StoreHandle> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::configuration("store name must not be empty"));
        }
        if config.pool_size == 0 {
            return Err(CoreError::configuration(format!(
                "store {name}: pool size must be at least 1"
            )));
        }

        let mut stores = self.stores.write();
        if stores.iter().any(|s| s.name == name) {
            return Err(CoreError::configuration(format!(
                "store {name} is already registered"
            )));
        }
        let store = Arc::new(Store {
            kind: driver.kind(),
            name,
            config,
            driver,
            slots: Slots::default(),
            stats: StoreStats::default(),
            pool_stats: Arc::clone(&self.pool_stats),
        });
        info!(store = %store.name, kind = %store.kind, "registered store");
        stores.push(Arc::clone(&store));
        Ok(store)
    }

    /// Registers stores discovered through a catalogue.
    ///
    /// Mounted stores join the end of the registration order. An entity
    /// type keeps resolving to the earliest registered store of its kind,
    /// so a mounted store hosts entity types only when no store of its kind
    /// was registered before it; otherwise it is reached by name through
    /// [`resolve_by_name`](Self::resolve_by_name).
    ///
    /// # Errors
    ///
    /// Stops at the first store that cannot be registered.
    pub fn mount(&self, discovered: &[DiscoveredStore]) -> CoreResult<Vec<StoreHandle>> {
        discovered
            .iter()
            .map(|d| {
                let handle = self.register(d.name.clone(), d.kind, d.config.clone())?;
                debug!(store = %d.name, "mounted discovered store");
                Ok(handle)
            })
            .collect()
    }

    /// Eligible store kinds of an entity type, in preference order.
    #[must_use]
    pub fn eligible_kinds(&self, entity_type: &str) -> &[StoreKind] {
        self.mappings
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The earliest registered store of a kind.
    #[must_use]
    pub fn first_of_kind(&self, kind: StoreKind) -> Option<StoreHandle> {
        self.stores.read().iter().find(|s| s.kind == kind).cloned()
    }

    /// Resolves the store hosting an entity type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the type maps to no registered store.
    pub fn resolve(&self, entity_type: &str) -> CoreResult<StoreHandle> {
        let kinds = self.eligible_kinds(entity_type);
        if kinds.is_empty() {
            return Err(CoreError::configuration(format!(
                "{entity_type} is not mapped to any store kind"
            )));
        }
        kinds
            .iter()
            .find_map(|kind| self.first_of_kind(*kind))
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "no registered store for {entity_type} (eligible: {kinds:?})"
                ))
            })
    }

    /// Resolves the store of a given kind hosting an entity type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the kind is not eligible for the
    /// type or has no registered store.
    pub fn resolve_for(&self, entity_type: &str, kind: StoreKind) -> CoreResult<StoreHandle> {
        if !self.eligible_kinds(entity_type).contains(&kind) {
            return Err(CoreError::configuration(format!(
                "{entity_type} is not mapped to {kind}"
            )));
        }
        self.first_of_kind(kind).ok_or_else(|| {
            CoreError::configuration(format!("no registered {kind} store for {entity_type}"))
        })
    }

    /// Looks a store up by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names.
    pub fn resolve_by_name(&self, name: &str) -> CoreResult<StoreHandle> {
        self.stores
            .read()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| CoreError::configuration(format!("unknown store {name}")))
    }

    /// All stores, in registration order.
    #[must_use]
    pub fn stores(&self) -> Vec<StoreHandle> {
        self.stores.read().clone()
    }

    /// Closes every store in reverse registration order and forgets them.
    ///
    /// Idle native connections are closed immediately; checked-out ones
    /// are closed when they are released.
    pub fn close(&self) {
        let stores = std::mem::take(&mut *self.stores.write());
        for store in stores.iter().rev() {
            let closed = store.slots.close(&store.pool_stats);
            info!(store = %store.name, closed, "closed store");
        }
    }
}
