//! The entity manager: lifecycle operations over every registered store.
//!
//! All operations take the caller's [`UnitOfWork`]. Writes begin the
//! transaction context for `(root type, store kind)` on first use and
//! never commit or roll it back on their own; that stays with the caller.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = env.manager();
//! let mut uow = env.unit_of_work("alice");
//!
//! let mut order = Entity::new("Order")
//!     .with("orderId", 1)
//!     .with_many("items", vec![item(1, 2), item(2, 5)]);
//! manager.create(&mut uow, &mut order, StoreKind::Relational)?;
//! manager.commit_all(&mut uow, "Order")?;
//! ```

use crate::audit::{self, AuditRecord, AuditSink};
use crate::entity::{Binding, Entity, EntityDescriptor, EntityState, ReferenceDecl};
use crate::error::{CoreError, CoreResult};
use crate::pool::ConnectionPool;
use crate::query::{render, Predicate, QueryBuilder};
use crate::registry::StoreRegistry;
use crate::resolver::ReferenceResolver;
use crate::schema::Schema;
use crate::search::SearchResults;
use crate::transaction::UnitOfWork;
use crate::types::{Operation, TxKey};
use crate::validation::validate;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use strata_codec::Value;
use strata_storage::{format_key, NativeQuery, RowKey, StorageError, StoreKind};
use tracing::{debug, info, warn};

/// Entities already written during one top-level call, by type and key.
type Visited = HashSet<(String, String)>;

fn same_key(a: &RowKey, b: &RowKey) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((fa, va), (fb, vb))| fa == fb && va.loosely_equals(vb))
}

fn same_values(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
}

/// Foreign keys with orphan removal whose reference is loaded, with the
/// join values they hold before the bound targets are adopted.
fn replaceable_pointers(descriptor: &EntityDescriptor, source: &Entity) -> Vec<(String, Vec<Value>)> {
    descriptor
        .references()
        .filter(|(field, decl)| {
            decl.orphan_removal
                && descriptor.holds_foreign_key(decl)
                && source.reference(field).is_some()
        })
        .filter_map(|(field, decl)| {
            EntityDescriptor::tuple(source, decl.source_columns()).map(|t| (field.to_string(), t))
        })
        .collect()
}

/// Points each foreign key at its bound target by copying the target's
/// join values onto the source. An empty binding clears the foreign key
/// only when the reference removes orphans.
fn adopt_join_values(descriptor: &EntityDescriptor, source: &mut Entity) {
    for (field, decl) in descriptor.references() {
        if !descriptor.holds_foreign_key(decl) {
            continue;
        }
        let values: Vec<Value> = match source.reference(field) {
            Some(Binding::One(Some(target))) => {
                match EntityDescriptor::tuple(target, decl.target_columns()) {
                    Some(values) => values,
                    None => continue,
                }
            }
            Some(Binding::One(None)) if decl.orphan_removal => {
                vec![Value::Null; decl.join_columns.len()]
            }
            _ => continue,
        };
        for (column, value) in decl.source_columns().zip(values) {
            source.set(column, value);
        }
    }
}

/// CRUD and search façade over the registered stores.
pub struct EntityManager {
    schema: Arc<Schema>,
    registry: Arc<StoreRegistry>,
    pool: Arc<ConnectionPool>,
    audit: Arc<dyn AuditSink>,
    batch_size: usize,
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("registry", &self.registry)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl EntityManager {
    /// Creates a manager over shared components.
    pub fn new(
        schema: Arc<Schema>,
        registry: Arc<StoreRegistry>,
        pool: Arc<ConnectionPool>,
        audit: Arc<dyn AuditSink>,
        batch_size: usize,
    ) -> Self {
        Self {
            schema,
            registry,
            pool,
            audit,
            batch_size: batch_size.max(1),
        }
    }

    /// The schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
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

    /// Page size for searches and tuple batches for reference lookups.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The reference resolver bound to this manager's components.
    #[must_use]
    pub fn resolver(&self) -> ReferenceResolver<'_> {
        ReferenceResolver::new(&self.schema, &self.registry, &self.pool, self.batch_size)
    }

    // =========================================================================
    // Transaction demarcation
    // =========================================================================

    /// Begins, or reuses, the context for `(root_type, kind)`.
    ///
    /// When `root_type` itself is not mapped to `kind` the context binds to
    /// the first registered store of that kind, which is where cascades
    /// into `kind` will write.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no store of `kind` is registered,
    /// or a transaction error if the existing context is not active.
    pub fn begin_transaction(
        &self,
        uow: &mut UnitOfWork,
        root_type: &str,
        kind: StoreKind,
    ) -> CoreResult<()> {
        let store = if self.registry.eligible_kinds(root_type).contains(&kind) {
            self.registry.resolve_for(root_type, kind)?
        } else {
            self.registry.first_of_kind(kind).ok_or_else(|| {
                CoreError::configuration(format!("no registered {kind} store"))
            })?
        };
        uow.begin(&self.pool, &store, TxKey::new(root_type, kind))?;
        debug!(unit = %uow.id(), root = %root_type, %kind, store = %store.name(), "transaction begun");
        Ok(())
    }

    /// Commits and releases the context for `(root_type, kind)`.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if no active context exists or the
    /// native commit fails; the context then stays in state `Error`.
    pub fn commit(&self, uow: &mut UnitOfWork, root_type: &str, kind: StoreKind) -> CoreResult<()> {
        let store = uow.commit(&TxKey::new(root_type, kind))?;
        info!(unit = %uow.id(), root = %root_type, %kind, %store, "committed");
        Ok(())
    }

    /// Rolls back and releases the context for `(root_type, kind)`.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if no context exists or the native
    /// rollback fails.
    pub fn rollback(
        &self,
        uow: &mut UnitOfWork,
        root_type: &str,
        kind: StoreKind,
    ) -> CoreResult<()> {
        uow.rollback(&TxKey::new(root_type, kind))?;
        info!(unit = %uow.id(), root = %root_type, %kind, "rolled back");
        Ok(())
    }

    /// Commits every context of `root_type` in begin order.
    ///
    /// Stores cannot commit atomically together. If a commit fails after
    /// others succeeded, the committed stores stay committed and the
    /// failure is reported as a partial commit; the failed and remaining
    /// contexts stay open for [`rollback_all`](Self::rollback_all).
    ///
    /// # Errors
    ///
    /// Returns the failure of the first commit as is, and
    /// [`CoreError::PartialCommit`] for any later one.
    pub fn commit_all(&self, uow: &mut UnitOfWork, root_type: &str) -> CoreResult<Vec<String>> {
        let mut committed = Vec::new();
        for key in uow.keys_for(root_type) {
            let store = uow
                .context(&key)
                .map(|ctx| ctx.store().name().to_string())
                .unwrap_or_default();
            match uow.commit(&key) {
                Ok(name) => {
                    info!(unit = %uow.id(), %key, store = %name, "committed");
                    committed.push(name);
                }
                Err(e) if committed.is_empty() => return Err(e),
                Err(e) => {
                    warn!(unit = %uow.id(), %key, %store, ?committed, "partial commit");
                    return Err(CoreError::PartialCommit {
                        root_type: root_type.to_string(),
                        committed,
                        failed_store: store,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(committed)
    }

    /// Rolls back every context of `root_type`, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns the first failure once every context has been released.
    pub fn rollback_all(&self, uow: &mut UnitOfWork, root_type: &str) -> CoreResult<()> {
        let mut first = None;
        for key in uow.keys_for(root_type) {
            match uow.rollback(&key) {
                Ok(()) => info!(unit = %uow.id(), %key, "rolled back"),
                Err(e) => {
                    warn!(unit = %uow.id(), %key, error = %e, "rollback failed");
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persists a new entity and cascades into its references.
    ///
    /// The entity's own type is the root of the unit of work. Bound
    /// targets of references cascading `Create` are created when `New`,
    /// updated when `Updated`, and left alone when `Synced`.
    ///
    /// A single-target reference joined on non-key columns is stored as a
    /// foreign key: its bound target is saved first and the entity takes
    /// over the target's join values. Every other reference is saved after
    /// the entity, with the entity's join values copied onto its targets.
    ///
    /// # Errors
    ///
    /// Returns a validation error without touching any store, a
    /// persistence error if the native insert fails, or a reference
    /// resolution error if a cascade fails. The last two leave the entity
    /// in state `Error` and the transaction open.
    pub fn create(&self, uow: &mut UnitOfWork, entity: &mut Entity, kind: StoreKind) -> CoreResult<()> {
        let root = entity.entity_type().to_string();
        self.persist(uow, &root, entity, Operation::Create, Some(kind), &mut Visited::new())
    }

    /// Replaces a persisted entity and cascades into its references.
    ///
    /// With orphan removal, stored targets no longer bound to a loaded
    /// reference are deleted; for a foreign key, that is the target it
    /// pointed at before the update.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create).
    pub fn update(&self, uow: &mut UnitOfWork, entity: &mut Entity, kind: StoreKind) -> CoreResult<()> {
        let root = entity.entity_type().to_string();
        self.persist(uow, &root, entity, Operation::Update, Some(kind), &mut Visited::new())
    }

    /// Removes a persisted entity.
    ///
    /// References cascading `Delete`, or declaring orphan removal, have
    /// their stored targets deleted as well.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create); deleting a key with no stored row
    /// is a persistence error.
    pub fn delete(&self, uow: &mut UnitOfWork, entity: &mut Entity, kind: StoreKind) -> CoreResult<()> {
        let root = entity.entity_type().to_string();
        self.persist(uow, &root, entity, Operation::Delete, Some(kind), &mut Visited::new())
    }

    /// Soft-deletes an entity by writing its active flag to false.
    ///
    /// Audited as an update. References are not cascaded.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the type declares no active flag,
    /// otherwise as for [`update`](Self::update).
    pub fn deactivate(
        &self,
        uow: &mut UnitOfWork,
        entity: &mut Entity,
        kind: StoreKind,
    ) -> CoreResult<()> {
        let descriptor = self.schema.descriptor(entity.entity_type())?;
        let flag = descriptor
            .active_flag_field()
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "{} declares no active flag",
                    descriptor.entity_type()
                ))
            })?
            .to_string();
        validate(&descriptor, entity, Operation::Update)?;
        let key = descriptor.key_of(entity)?;

        entity.set(flag, false);
        let root = descriptor.entity_type().to_string();
        self.write(uow, &root, &descriptor, entity, &key, Operation::Update, Some(kind))?;
        entity.set_state(EntityState::InActive);
        self.audit(uow, &descriptor, &key, Operation::Update);
        Ok(())
    }

    fn persist(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        entity: &mut Entity,
        op: Operation,
        kind: Option<StoreKind>,
        visited: &mut Visited,
    ) -> CoreResult<()> {
        let descriptor = self.schema.descriptor(entity.entity_type())?;
        let replaced = if op == Operation::Update {
            replaceable_pointers(&descriptor, entity)
        } else {
            Vec::new()
        };
        if op != Operation::Delete {
            adopt_join_values(&descriptor, entity);
        }
        validate(&descriptor, entity, op)?;
        let key = descriptor.key_of(entity)?;
        if !visited.insert((descriptor.entity_type().to_string(), format_key(&key))) {
            return Ok(());
        }

        if op != Operation::Delete {
            if let Err(e) = self.cascade_pointed(uow, root, &descriptor, entity, op, visited) {
                entity.set_state(EntityState::Error(e.to_string()));
                return Err(e);
            }
        }
        self.write(uow, root, &descriptor, entity, &key, op, kind)?;
        entity.set_state(EntityState::after(op));

        if let Err(e) = self.cascade(uow, root, &descriptor, entity, op, &replaced, visited) {
            entity.set_state(EntityState::Error(e.to_string()));
            return Err(e);
        }
        self.audit(uow, &descriptor, &key, op);
        Ok(())
    }

    /// Runs the native write inside the context for `(root, store kind)`.
    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        descriptor: &EntityDescriptor,
        entity: &mut Entity,
        key: &RowKey,
        op: Operation,
        kind: Option<StoreKind>,
    ) -> CoreResult<()> {
        let entity_type = descriptor.entity_type();
        let store = match kind {
            Some(kind) => self.registry.resolve_for(entity_type, kind)?,
            None => self.registry.resolve(entity_type)?,
        };
        let collection = descriptor.collection_name();
        let rendered = format_key(key);

        let conn = uow.begin(&self.pool, &store, TxKey::new(root, store.kind()))?;
        let result = match op {
            Operation::Create => conn.insert(collection, key, &descriptor.to_row(entity)),
            Operation::Update => conn.update(collection, key, &descriptor.to_row(entity)),
            Operation::Delete => conn.delete(collection, key).and_then(|found| {
                if found {
                    Ok(())
                } else {
                    Err(StorageError::NotFound {
                        collection: collection.to_string(),
                        key: rendered.clone(),
                    })
                }
            }),
        };

        match result {
            Ok(()) => {
                debug!(%entity_type, key = %rendered, store = %store.name(), %op, "written");
                Ok(())
            }
            Err(source) => {
                let err = CoreError::persistence(entity_type, &rendered, store.name(), source);
                warn!(%entity_type, key = %rendered, store = %store.name(), %op, error = %err, "write failed");
                entity.set_state(EntityState::Error(err.to_string()));
                Err(err)
            }
        }
    }

    fn audit(&self, uow: &UnitOfWork, descriptor: &EntityDescriptor, key: &RowKey, op: Operation) {
        let record = AuditRecord {
            entity_type: descriptor.entity_type().to_string(),
            key: format_key(key),
            actor: uow.actor().to_string(),
            operation: op,
            timestamp: SystemTime::now(),
        };
        audit::emit(&*self.audit, &record);
    }

    // =========================================================================
    // Cascades
    // =========================================================================

    /// Saves the bound targets of the references this entity points at
    /// through a foreign key, before the entity itself is written.
    fn cascade_pointed(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        descriptor: &EntityDescriptor,
        source: &mut Entity,
        op: Operation,
        visited: &mut Visited,
    ) -> CoreResult<()> {
        for (field, decl) in descriptor.references() {
            if descriptor.holds_foreign_key(decl) && decl.cascades(op) {
                self.cascade_save(uow, root, source, field, decl, op, false, visited)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn cascade(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        descriptor: &EntityDescriptor,
        source: &mut Entity,
        op: Operation,
        replaced: &[(String, Vec<Value>)],
        visited: &mut Visited,
    ) -> CoreResult<()> {
        for (field, decl) in descriptor.references() {
            match op {
                Operation::Create | Operation::Update if descriptor.holds_foreign_key(decl) => {
                    if let Some((_, before)) = replaced.iter().find(|(f, _)| f == field) {
                        self.remove_replaced(uow, root, source, field, decl, before, visited)?;
                    }
                }
                Operation::Create | Operation::Update => {
                    if decl.cascades(op) {
                        self.cascade_save(uow, root, source, field, decl, op, true, visited)?;
                    }
                    if op == Operation::Update && decl.orphan_removal {
                        self.remove_orphans(uow, root, source, field, decl, visited)?;
                    }
                }
                Operation::Delete => {
                    if decl.cascades(op) || decl.orphan_removal {
                        self.cascade_delete(uow, root, source, field, decl, visited)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn target_store_name(&self, decl: &ReferenceDecl) -> String {
        self.resolver()
            .target_store(decl)
            .map_or_else(|_| "?".to_string(), |s| s.name().to_string())
    }

    /// Writes the bound targets of one reference. With `propagate`, the
    /// source's join values are first copied onto each target, which holds
    /// the foreign key.
    #[allow(clippy::too_many_arguments)]
    fn cascade_save(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        source: &mut Entity,
        field: &str,
        decl: &ReferenceDecl,
        op: Operation,
        propagate: bool,
        visited: &mut Visited,
    ) -> CoreResult<()> {
        let Some(mut binding) = source.unbind(field) else {
            return Ok(());
        };
        let join: Vec<(&str, Value)> = if propagate {
            decl.join_columns
                .iter()
                .filter_map(|(s, t)| {
                    source
                        .get(s)
                        .filter(|v| !v.is_null())
                        .map(|v| (t.as_str(), v.clone()))
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut outcome = Ok(());
        for target in binding.entities_mut() {
            for (column, value) in &join {
                if target.get(column) != Some(value) {
                    target.set(*column, value.clone());
                    if *target.state() == EntityState::Synced {
                        target.set_state(EntityState::Updated);
                    }
                }
            }
            let target_op = match (op, target.state()) {
                (_, EntityState::New | EntityState::Unknown) => Some(Operation::Create),
                (Operation::Create, EntityState::Error(_)) => Some(Operation::Create),
                (_, EntityState::Updated) => Some(Operation::Update),
                (Operation::Update, EntityState::Synced | EntityState::Error(_)) => {
                    Some(Operation::Update)
                }
                _ => None,
            };
            let Some(target_op) = target_op else {
                continue;
            };
            debug!(source = %source.entity_type(), field, target = %decl.target_type, op = %target_op, "cascade");
            if let Err(e) = self.persist(uow, root, target, target_op, decl.target_kind, visited) {
                outcome = Err(e.into_reference(
                    source.entity_type(),
                    field,
                    &self.target_store_name(decl),
                ));
                break;
            }
        }
        source.bind(field, binding);
        outcome
    }

    /// Deletes stored targets that are no longer bound to a loaded
    /// reference.
    fn remove_orphans(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        source: &Entity,
        field: &str,
        decl: &ReferenceDecl,
        visited: &mut Visited,
    ) -> CoreResult<()> {
        let Some(binding) = source.reference(field) else {
            return Ok(());
        };
        let wrap = |e: CoreError| e.into_reference(source.entity_type(), field, &self.target_store_name(decl));
        let target = self.schema.descriptor(&decl.target_type).map_err(wrap)?;
        let bound: Vec<RowKey> = binding
            .entities()
            .filter_map(|t| target.key_of(t).ok())
            .collect();

        let stored = self.resolver().stored_targets(uow, source, field, decl)?;
        for mut orphan in stored {
            let key = target.key_of(&orphan).map_err(wrap)?;
            if bound.iter().any(|b| same_key(b, &key)) {
                continue;
            }
            debug!(source = %source.entity_type(), field, key = %format_key(&key), "removing orphan");
            self.persist(uow, root, &mut orphan, Operation::Delete, decl.target_kind, visited)
                .map_err(wrap)?;
        }
        Ok(())
    }

    /// Deletes the target a foreign key pointed at before an update, once
    /// the source points elsewhere or at nothing.
    #[allow(clippy::too_many_arguments)]
    fn remove_replaced(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        source: &Entity,
        field: &str,
        decl: &ReferenceDecl,
        before: &[Value],
        visited: &mut Visited,
    ) -> CoreResult<()> {
        let now = EntityDescriptor::tuple(source, decl.source_columns());
        if now.is_some_and(|now| same_values(&now, before)) {
            return Ok(());
        }
        let wrap = |e: CoreError| e.into_reference(source.entity_type(), field, &self.target_store_name(decl));
        let stored = self
            .resolver()
            .targets_of(uow, source.entity_type(), field, decl, before)?;
        for mut orphan in stored {
            debug!(source = %source.entity_type(), field, target = %decl.target_type, "removing replaced target");
            self.persist(uow, root, &mut orphan, Operation::Delete, decl.target_kind, visited)
                .map_err(wrap)?;
        }
        Ok(())
    }

    /// Deletes every stored target of one reference and marks the matching
    /// bound targets as deleted.
    fn cascade_delete(
        &self,
        uow: &mut UnitOfWork,
        root: &str,
        source: &mut Entity,
        field: &str,
        decl: &ReferenceDecl,
        visited: &mut Visited,
    ) -> CoreResult<()> {
        let store = self.target_store_name(decl);
        let target = self
            .schema
            .descriptor(&decl.target_type)
            .map_err(|e| e.into_reference(source.entity_type(), field, &store))?;
        let stored = self.resolver().stored_targets(uow, source, field, decl)?;

        let mut deleted = Vec::with_capacity(stored.len());
        for mut row in stored {
            let key = target
                .key_of(&row)
                .map_err(|e| e.into_reference(source.entity_type(), field, &store))?;
            debug!(source = %source.entity_type(), field, key = %format_key(&key), "cascade delete");
            self.persist(uow, root, &mut row, Operation::Delete, decl.target_kind, visited)
                .map_err(|e| e.into_reference(source.entity_type(), field, &store))?;
            deleted.push(key);
        }

        if let Some(binding) = source.reference_mut(field) {
            for bound in binding.entities_mut() {
                let gone = target
                    .key_of(bound)
                    .is_ok_and(|k| deleted.iter().any(|d| same_key(d, &k)));
                if gone {
                    bound.set_state(EntityState::Deleted);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Looks an entity up by key values given in key-field order.
    ///
    /// The entity's references are resolved one level deep.
    ///
    /// # Errors
    ///
    /// Returns an invalid query error for a key of the wrong arity, a
    /// persistence error if the read fails, or a reference resolution
    /// error.
    pub fn find(
        &self,
        uow: &mut UnitOfWork,
        entity_type: &str,
        key: &[Value],
        kind: StoreKind,
    ) -> CoreResult<Option<Entity>> {
        let descriptor = self.schema.descriptor(entity_type)?;
        let key = descriptor.key_from_values(key)?;
        let store = self.registry.resolve_for(entity_type, kind)?;
        let row = uow.with_connection(&self.pool, &store, |conn| {
            conn.get(descriptor.collection_name(), &key).map_err(|e| {
                CoreError::persistence(entity_type, format_key(&key), store.name(), e)
            })
        })?;
        let Some(row) = row else {
            debug!(%entity_type, key = %format_key(&key), "not found");
            return Ok(None);
        };

        let mut found = [descriptor.from_row(row)];
        self.resolver().resolve_batch(uow, &mut found)?;
        let [entity] = found;
        Ok(Some(entity))
    }

    /// Searches the store of `kind` hosting `entity_type`.
    ///
    /// The predicate is translated once, including any cross-store
    /// semi-joins; rows are then fetched lazily, one page of
    /// [`batch_size`](Self::batch_size) at a time, with references resolved
    /// per page.
    ///
    /// # Errors
    ///
    /// Returns an error if the predicate cannot be translated for the
    /// store.
    pub fn search<'m>(
        &'m self,
        uow: &'m mut UnitOfWork,
        predicate: &Predicate,
        entity_type: &str,
        kind: StoreKind,
    ) -> CoreResult<SearchResults<'m>> {
        let descriptor = self.schema.descriptor(entity_type)?;
        let store = self.registry.resolve_for(entity_type, kind)?;
        let query = {
            let resolver = self.resolver();
            let mut scope = resolver.scope(uow);
            render(predicate, &descriptor, &store, &mut scope)?
        };
        debug!(%entity_type, store = %store.name(), %query, "search");
        Ok(SearchResults::new(self, uow, descriptor, store, query))
    }

    /// Translates a builder for the store of `kind` hosting `root_type`,
    /// resolving cross-store paths within `uow`.
    ///
    /// # Errors
    ///
    /// Returns the builder's error, or any error raised while rendering.
    pub fn parse(
        &self,
        uow: &mut UnitOfWork,
        builder: &QueryBuilder,
        root_type: &str,
        kind: StoreKind,
    ) -> CoreResult<NativeQuery> {
        let resolver = self.resolver();
        let mut scope = resolver.scope(uow);
        builder.parse(root_type, kind, &mut scope)
    }
}
