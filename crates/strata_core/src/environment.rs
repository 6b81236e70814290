//! Environment lifecycle.

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::EnvironmentConfig;
use crate::error::{CoreError, CoreResult};
use crate::manager::EntityManager;
use crate::pool::{CatalogueEntry, ConnectionPool, DiscoveredStore};
use crate::registry::{StoreHandle, StoreRegistry};
use crate::schema::Schema;
use crate::transaction::UnitOfWork;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use strata_storage::{NativeQuery, StoreKind};
use tracing::{debug, info};

/// A running persistence environment.
///
/// `Environment` constructs the schema, connection pool, store registry
/// and entity manager once, and tears them down once:
/// - [`open`](Self::open) validates the schema against the store
///   mappings, registers every configured store and provisions each
///   entity type's collection on every store of an eligible kind
/// - [`shutdown`](Self::shutdown) closes the stores in reverse
///   registration order
///
/// # Example
///
/// ```rust,ignore
/// use strata_core::{EnvironmentConfig, Environment, Schema};
///
/// let config = EnvironmentConfig::new()
///     .store("orders-db", StoreKind::Relational, ConnectionConfig::new("orders.db"))
///     .store("items-search", StoreKind::SearchIndex, ConnectionConfig::new("items"))
///     .map("Order", [StoreKind::Relational])
///     .map("Item", [StoreKind::SearchIndex]);
/// let env = Environment::open(config, schema)?;
///
/// let mut uow = env.unit_of_work("alice");
/// env.manager().create(&mut uow, &mut order, StoreKind::Relational)?;
/// env.manager().commit_all(&mut uow, "Order")?;
///
/// env.shutdown();
/// ```
pub struct Environment {
    config: EnvironmentConfig,
    schema: Arc<Schema>,
    pool: Arc<ConnectionPool>,
    registry: Arc<StoreRegistry>,
    manager: EntityManager,
    is_open: RwLock<bool>,
}

impl Environment {
    /// Opens an environment that audits through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for inconsistent metadata, or a
    /// connection error if a collection cannot be provisioned.
    pub fn open(config: EnvironmentConfig, schema: Schema) -> CoreResult<Self> {
        Self::open_with(config, schema, Arc::new(TracingAuditSink))
    }

    /// Opens an environment with a custom audit sink.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_with(
        config: EnvironmentConfig,
        schema: Schema,
        audit: Arc<dyn AuditSink>,
    ) -> CoreResult<Self> {
        if config.search_batch_size == 0 {
            return Err(CoreError::configuration(
                "search batch size must be at least 1",
            ));
        }
        schema.validate(&config)?;

        let schema = Arc::new(schema);
        let pool = Arc::new(ConnectionPool::new());
        let registry = Arc::new(StoreRegistry::new(config.mappings.clone(), &pool));
        for store in &config.stores {
            registry.register(store.name.clone(), store.kind, store.connection.clone())?;
        }

        let manager = EntityManager::new(
            Arc::clone(&schema),
            Arc::clone(&registry),
            Arc::clone(&pool),
            audit,
            config.search_batch_size,
        );
        let env = Self {
            config,
            schema,
            pool,
            registry,
            manager,
            is_open: RwLock::new(true),
        };
        for store in env.registry.stores() {
            env.provision(&store)?;
        }
        info!(
            stores = env.config.stores.len(),
            types = env.schema.descriptors().count(),
            "environment open"
        );
        Ok(env)
    }

    /// Creates the collection of every type eligible for `store`'s kind.
    fn provision(&self, store: &StoreHandle) -> CoreResult<()> {
        let kind = store.kind();
        let mut conn = self.pool.acquire(store)?;
        for descriptor in self.schema.descriptors() {
            if !self.registry.eligible_kinds(descriptor.entity_type()).contains(&kind) {
                continue;
            }
            conn.ensure_collection(&descriptor.layout(kind)).map_err(|e| {
                CoreError::connection(
                    store.name(),
                    format!("cannot provision {}: {e}", descriptor.collection_name()),
                )
            })?;
            debug!(store = %store.name(), collection = %descriptor.collection_name(), "provisioned");
        }
        Ok(())
    }

    /// The configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// The entity manager.
    #[must_use]
    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    /// The store registry.
    #[must_use]
    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Starts a unit of work on behalf of `actor`.
    pub fn unit_of_work(&self, actor: impl Into<String>) -> UnitOfWork {
        UnitOfWork::new(actor)
    }

    /// Registers discovered stores and provisions their collections.
    ///
    /// Entity types already served by a store of the same kind stay on it;
    /// the mounted store is reached by name through
    /// [`StoreRegistry::resolve_by_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the environment is shut down, a store cannot be
    /// registered, or a collection cannot be provisioned.
    pub fn mount(&self, discovered: &[DiscoveredStore]) -> CoreResult<Vec<StoreHandle>> {
        self.ensure_open()?;
        let mounted = self.registry.mount(discovered)?;
        for store in &mounted {
            self.provision(store)?;
        }
        Ok(mounted)
    }

    /// Reads a catalogue through the store named `seed` and mounts every
    /// accepted entry as a store of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed is unknown, the catalogue cannot be
    /// read, or mounting fails.
    pub fn discover<C, F>(
        &self,
        seed: &str,
        catalogue: &NativeQuery,
        kind: StoreKind,
        filter: F,
    ) -> CoreResult<Vec<StoreHandle>>
    where
        C: CatalogueEntry,
        F: Fn(&C) -> bool,
    {
        self.ensure_open()?;
        let seed = self.registry.resolve_by_name(seed)?;
        let discovered = self
            .pool
            .read_connections::<C, F>(&seed, catalogue, kind, filter)?;
        info!(seed = %seed.name(), found = discovered.len(), "discovered stores");
        self.mount(&discovered)
    }

    /// Returns true until [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::configuration("environment is shut down"))
        }
    }

    /// Closes every store. Later calls do nothing.
    pub fn shutdown(&self) {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return;
        }
        self.registry.close();
        *is_open = false;
        info!("environment shut down");
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("stores", &self.config.stores.len())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityDescriptor;
    use strata_storage::ConnectionConfig;

    fn schema() -> Schema {
        Schema::new()
            .with(EntityDescriptor::new("Note").collection("notes").key(["id"]).field("body"))
            .unwrap()
    }

    fn config(location: &str) -> EnvironmentConfig {
        EnvironmentConfig::new()
            .store("notes-db", StoreKind::Relational, ConnectionConfig::new(location))
            .map("Note", [StoreKind::Relational])
    }

    #[test]
    fn open_registers_and_provisions() {
        let env = Environment::open(config("memory:env-open"), schema()).unwrap();
        assert!(env.is_open());
        let store = env.registry().resolve("Note").unwrap();
        assert_eq!(store.name(), "notes-db");
        assert_eq!(env.pool().stats().created, 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Environment::open(config("memory:env-zero").search_batch_size(0), schema())
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn unmapped_type_is_rejected() {
        let config = EnvironmentConfig::new().store(
            "notes-db",
            StoreKind::Relational,
            ConnectionConfig::new("memory:env-unmapped"),
        );
        assert!(Environment::open(config, schema()).is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let env = Environment::open(config("memory:env-shutdown"), schema()).unwrap();
        env.shutdown();
        env.shutdown();
        assert!(!env.is_open());
        assert!(env.registry().stores().is_empty());
        assert!(env.mount(&[]).is_err());
    }
}
