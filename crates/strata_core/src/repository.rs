//! Typed repository over the entity manager.

use crate::entity::{EntityMapping, EntityState};
use crate::error::{CoreError, CoreResult};
use crate::manager::EntityManager;
use crate::query::Predicate;
use crate::transaction::UnitOfWork;
use std::marker::PhantomData;
use strata_codec::Value;
use strata_storage::StoreKind;

/// Type-safe access to entities of type `T`.
///
/// Values are converted through [`EntityMapping`] on the way in and out;
/// every call still runs inside the caller's unit of work, so commit and
/// rollback stay explicit.
///
/// # Example
///
/// ```rust,ignore
/// let orders: Repository<'_, Order> = Repository::new(env.manager())?;
/// let mut uow = env.unit_of_work("alice");
///
/// let saved = orders.create(&mut uow, &Order::new(1, "acme"))?;
/// env.manager().commit_all(&mut uow, Order::ENTITY_TYPE)?;
///
/// let found = orders.find(&mut uow, &[Value::from(1)])?;
/// ```
pub struct Repository<'m, T: EntityMapping> {
    manager: &'m EntityManager,
    kind: StoreKind,
    _marker: PhantomData<T>,
}

impl<'m, T: EntityMapping> Repository<'m, T> {
    /// Creates a repository on the first store kind `T` is mapped to.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `T` is not mapped to any kind.
    pub fn new(manager: &'m EntityManager) -> CoreResult<Self> {
        let kind = manager
            .registry()
            .eligible_kinds(T::ENTITY_TYPE)
            .first()
            .copied()
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "{} is not mapped to any store kind",
                    T::ENTITY_TYPE
                ))
            })?;
        Ok(Self {
            manager,
            kind,
            _marker: PhantomData,
        })
    }

    /// Targets another eligible store kind.
    #[must_use]
    pub fn in_kind(mut self, kind: StoreKind) -> Self {
        self.kind = kind;
        self
    }

    /// The store kind written and read.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Persists a new value and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns any error of [`EntityManager::create`], or a mapping error.
    pub fn create(&self, uow: &mut UnitOfWork, value: &T) -> CoreResult<T> {
        let mut entity = value.to_entity();
        self.manager.create(uow, &mut entity, self.kind)?;
        T::from_entity(&entity)
    }

    /// Replaces a persisted value.
    ///
    /// The root is written as an update. Bound targets keep the states
    /// `to_entity` gave them.
    ///
    /// # Errors
    ///
    /// Returns any error of [`EntityManager::update`], or a mapping error.
    pub fn update(&self, uow: &mut UnitOfWork, value: &T) -> CoreResult<T> {
        let mut entity = value.to_entity().with_state(EntityState::Updated);
        self.manager.update(uow, &mut entity, self.kind)?;
        T::from_entity(&entity)
    }

    /// Removes a persisted value.
    ///
    /// # Errors
    ///
    /// Returns any error of [`EntityManager::delete`].
    pub fn delete(&self, uow: &mut UnitOfWork, value: &T) -> CoreResult<()> {
        let mut entity = value.to_entity().with_state(EntityState::Synced);
        self.manager.delete(uow, &mut entity, self.kind)
    }

    /// Soft-deletes a persisted value.
    ///
    /// # Errors
    ///
    /// Returns any error of [`EntityManager::deactivate`].
    pub fn deactivate(&self, uow: &mut UnitOfWork, value: &T) -> CoreResult<()> {
        let mut entity = value.to_entity().with_state(EntityState::Synced);
        self.manager.deactivate(uow, &mut entity, self.kind)
    }

    /// Looks a value up by key values in key-field order.
    ///
    /// # Errors
    ///
    /// Returns any error of [`EntityManager::find`], or a mapping error.
    pub fn find(&self, uow: &mut UnitOfWork, key: &[Value]) -> CoreResult<Option<T>> {
        self.manager
            .find(uow, T::ENTITY_TYPE, key, self.kind)?
            .map(|entity| T::from_entity(&entity))
            .transpose()
    }

    /// Every value matching `predicate`, in store order.
    ///
    /// # Errors
    ///
    /// Returns the first search or mapping error.
    pub fn search(&self, uow: &mut UnitOfWork, predicate: &Predicate) -> CoreResult<Vec<T>> {
        self.manager
            .search(uow, predicate, T::ENTITY_TYPE, self.kind)?
            .map(|found| found.and_then(|entity| T::from_entity(&entity)))
            .collect()
    }
}
