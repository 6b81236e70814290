//! Reference resolution: joins emulated across store boundaries.
//!
//! A reference is never resolved with a native join spanning two stores.
//! For a batch of source entities the resolver collects the distinct
//! source join tuples, looks them up in the target's store with one query
//! per `search_batch_size` tuples, and partitions the returned rows back
//! onto the sources by re-matching join values.

use crate::entity::{Binding, Entity, EntityDescriptor, ReferenceDecl};
use crate::error::{CoreError, CoreResult};
use crate::pool::ConnectionPool;
use crate::query::{override_lookup, render, tuple_lookup, PathResolver, Predicate, TUPLE_COLUMN};
use crate::registry::{StoreHandle, StoreRegistry};
use crate::schema::Schema;
use crate::transaction::UnitOfWork;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_codec::{Row, Value};
use strata_storage::StoreKind;
use tracing::debug;

/// Resolved targets by normalized join tuple.
type Groups = HashMap<Vec<Value>, Vec<Entity>>;

/// Materializes and looks up referenced entities.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
    schema: &'a Schema,
    registry: &'a StoreRegistry,
    pool: &'a ConnectionPool,
    batch_size: usize,
}

/// Hash key of a join tuple; loosely equal tuples share one.
fn tuple_key(tuple: &[Value]) -> Vec<Value> {
    tuple.iter().map(Value::normalized).collect()
}

impl<'a> ReferenceResolver<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        registry: &'a StoreRegistry,
        pool: &'a ConnectionPool,
        batch_size: usize,
    ) -> Self {
        Self {
            schema,
            registry,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// The store hosting a reference's target.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the target maps to no store.
    pub fn target_store(&self, decl: &ReferenceDecl) -> CoreResult<StoreHandle> {
        match decl.target_kind {
            Some(kind) => self.registry.resolve_for(&decl.target_type, kind),
            None => self.registry.resolve(&decl.target_type),
        }
    }

    /// Binds every declared reference of `entities`, one level deep.
    ///
    /// All entities must share one type. References are processed in
    /// declaration order; each issues one query per `search_batch_size`
    /// distinct source tuples against its target store, override queries
    /// included. Targets are read through the unit of work's connection to
    /// the target store when it holds one.
    ///
    /// # Errors
    ///
    /// Returns a reference resolution error naming the failing reference.
    pub fn resolve_batch(&self, uow: &mut UnitOfWork, entities: &mut [Entity]) -> CoreResult<()> {
        let Some(first) = entities.first() else {
            return Ok(());
        };
        let descriptor = self.schema.descriptor(first.entity_type())?;
        for (field, decl) in descriptor.references() {
            self.resolve_reference(uow, &descriptor, field, decl, entities)?;
        }
        Ok(())
    }

    fn resolve_reference(
        &self,
        uow: &mut UnitOfWork,
        descriptor: &EntityDescriptor,
        field: &str,
        decl: &ReferenceDecl,
        entities: &mut [Entity],
    ) -> CoreResult<()> {
        let source_type = descriptor.entity_type();
        let source_columns: Vec<&str> = decl.source_columns().collect();

        let mut seen = HashSet::new();
        let mut tuples: Vec<Vec<Value>> = Vec::new();
        for entity in entities.iter() {
            if let Some(tuple) = EntityDescriptor::tuple(entity, source_columns.iter().copied()) {
                if seen.insert(tuple_key(&tuple)) {
                    tuples.push(tuple);
                }
            }
        }

        let groups = if tuples.is_empty() {
            Groups::new()
        } else {
            let target = self
                .schema
                .descriptor(&decl.target_type)
                .map_err(|e| e.into_reference(source_type, field, "?"))?;
            let store = self
                .target_store(decl)
                .map_err(|e| e.into_reference(source_type, field, "?"))?;
            self.fetch_groups(uow, &store, &target, decl, &tuples)
                .map_err(|e| e.into_reference(source_type, field, store.name()))?
        };

        for entity in entities.iter_mut() {
            let matched = EntityDescriptor::tuple(entity, source_columns.iter().copied())
                .and_then(|tuple| groups.get(&tuple_key(&tuple)))
                .cloned()
                .unwrap_or_default();
            let binding = if decl.cardinality.is_collection() {
                Binding::Many(matched)
            } else {
                Binding::One(matched.into_iter().next().map(Box::new))
            };
            entity.bind(field, binding);
        }
        debug!(
            source = %source_type,
            field,
            target = %decl.target_type,
            tuples = tuples.len(),
            "resolved reference"
        );
        Ok(())
    }

    /// Looks up the targets of `tuples`, grouped by tuple in result order.
    fn fetch_groups(
        &self,
        uow: &mut UnitOfWork,
        store: &StoreHandle,
        target: &EntityDescriptor,
        decl: &ReferenceDecl,
        tuples: &[Vec<Value>],
    ) -> CoreResult<Groups> {
        let target_columns: Vec<&str> = decl.target_columns().collect();
        let mut groups = Groups::new();
        for chunk in tuples.chunks(self.batch_size) {
            let query = match &decl.query {
                Some(sql) => override_lookup(sql, chunk),
                None => tuple_lookup(target, store.kind(), &target_columns, chunk),
            };
            let rows: Vec<Row> = uow.with_connection(self.pool, store, |conn| {
                conn.query(&query)
                    .map_err(|e| CoreError::persistence(target.entity_type(), "*", store.name(), e))
            })?;
            debug!(store = %store.name(), tuples = chunk.len(), rows = rows.len(), "batched reference query");

            for row in rows {
                let key = if decl.query.is_some() {
                    row.get(TUPLE_COLUMN)
                        .and_then(Value::as_integer)
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| chunk.get(i))
                        .map(|tuple| tuple_key(tuple))
                } else {
                    target_columns
                        .iter()
                        .map(|c| row.get(*c).filter(|v| !v.is_null()).map(Value::normalized))
                        .collect()
                };
                if let Some(key) = key {
                    groups.entry(key).or_default().push(target.from_row(row));
                }
            }
        }
        Ok(groups)
    }

    /// Targets currently stored for one source entity, in result order.
    ///
    /// # Errors
    ///
    /// Returns a reference resolution error if the lookup fails.
    pub(crate) fn stored_targets(
        &self,
        uow: &mut UnitOfWork,
        source: &Entity,
        field: &str,
        decl: &ReferenceDecl,
    ) -> CoreResult<Vec<Entity>> {
        match EntityDescriptor::tuple(source, decl.source_columns()) {
            Some(tuple) => self.targets_of(uow, source.entity_type(), field, decl, &tuple),
            None => Ok(Vec::new()),
        }
    }

    /// Targets stored for the source join values `tuple`.
    ///
    /// # Errors
    ///
    /// Returns a reference resolution error if the lookup fails.
    pub(crate) fn targets_of(
        &self,
        uow: &mut UnitOfWork,
        source_type: &str,
        field: &str,
        decl: &ReferenceDecl,
        tuple: &[Value],
    ) -> CoreResult<Vec<Entity>> {
        let target = self
            .schema
            .descriptor(&decl.target_type)
            .map_err(|e| e.into_reference(source_type, field, "?"))?;
        let store = self
            .target_store(decl)
            .map_err(|e| e.into_reference(source_type, field, "?"))?;
        let mut groups = self
            .fetch_groups(uow, &store, &target, decl, &[tuple.to_vec()])
            .map_err(|e| e.into_reference(source_type, field, store.name()))?;
        Ok(groups.remove(&tuple_key(tuple)).unwrap_or_default())
    }

    /// Scopes path resolution for query rendering to a unit of work.
    pub(crate) fn scope<'s>(&'s self, uow: &'s mut UnitOfWork) -> QueryScope<'s, 'a> {
        QueryScope { resolver: self, uow }
    }
}

/// Resolves predicate paths for one unit of work.
pub(crate) struct QueryScope<'s, 'a> {
    resolver: &'s ReferenceResolver<'a>,
    uow: &'s mut UnitOfWork,
}

impl PathResolver for QueryScope<'_, '_> {
    fn descriptor(&self, entity_type: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.resolver.schema.descriptor(entity_type)
    }

    fn store_for(&self, entity_type: &str, kind: Option<StoreKind>) -> CoreResult<StoreHandle> {
        match kind {
            Some(kind) => self.resolver.registry.resolve_for(entity_type, kind),
            None => self.resolver.registry.resolve(entity_type),
        }
    }

    fn semi_join(
        &mut self,
        decl: &ReferenceDecl,
        filter: &Predicate,
    ) -> CoreResult<Vec<Vec<Value>>> {
        let target = self.descriptor(&decl.target_type)?;
        let store = self.resolver.target_store(decl)?;
        let query = render(filter, &target, &store, self)?;
        let columns: Vec<&str> = decl.target_columns().collect();
        let rows = self
            .uow
            .with_connection(self.resolver.pool, &store, |conn| {
                conn.query(&query)
                    .map_err(|e| CoreError::persistence(target.entity_type(), "*", store.name(), e))
            })?;

        let mut seen = HashSet::new();
        let mut tuples: Vec<Vec<Value>> = Vec::new();
        for row in rows {
            let tuple: Option<Vec<Value>> = columns
                .iter()
                .map(|c| row.get(*c).filter(|v| !v.is_null()).cloned())
                .collect();
            if let Some(tuple) = tuple {
                if seen.insert(tuple_key(&tuple)) {
                    tuples.push(tuple);
                }
            }
        }
        debug!(store = %store.name(), target = %decl.target_type, matches = tuples.len(), "semi-join");
        Ok(tuples)
    }
}
