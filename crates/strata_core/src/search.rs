//! Lazy, paged search results.

use crate::entity::{Entity, EntityDescriptor};
use crate::error::{CoreError, CoreResult};
use crate::manager::EntityManager;
use crate::query::paged;
use crate::registry::StoreHandle;
use crate::transaction::UnitOfWork;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::Arc;
use strata_storage::{NativeQuery, Page};
use tracing::debug;

/// Entities matching a search, fetched one page at a time.
///
/// Each page is a single native query; the references of every entity on
/// the page are resolved together before the first of them is yielded.
/// Reads go through the unit of work's context when one is open, so staged
/// writes are visible. The sequence ends after a short page, after the
/// first error, and can be restarted with [`rewind`](Self::rewind).
pub struct SearchResults<'m> {
    manager: &'m EntityManager,
    uow: &'m mut UnitOfWork,
    descriptor: Arc<EntityDescriptor>,
    store: StoreHandle,
    query: NativeQuery,
    offset: usize,
    buffer: VecDeque<Entity>,
    exhausted: bool,
    failed: bool,
}

impl<'m> SearchResults<'m> {
    pub(crate) fn new(
        manager: &'m EntityManager,
        uow: &'m mut UnitOfWork,
        descriptor: Arc<EntityDescriptor>,
        store: StoreHandle,
        query: NativeQuery,
    ) -> Self {
        Self {
            manager,
            uow,
            descriptor,
            store,
            query,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            failed: false,
        }
    }

    /// The native query, without paging.
    #[must_use]
    pub fn statement(&self) -> &NativeQuery {
        &self.query
    }

    /// The store being searched.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Restarts the sequence from the first row.
    ///
    /// The next page is read afresh, so writes made in between are seen.
    pub fn rewind(&mut self) {
        self.offset = 0;
        self.buffer.clear();
        self.exhausted = false;
        self.failed = false;
    }

    fn fetch_page(&mut self) -> CoreResult<()> {
        let page_size = self.manager.batch_size();
        let query = paged(&self.query, Page::new(self.offset, page_size));
        let entity_type = self.descriptor.entity_type();
        let store = &self.store;
        let rows = self
            .uow
            .with_connection(self.manager.pool(), store, |conn| {
                conn.query(&query)
                    .map_err(|e| CoreError::persistence(entity_type, "*", store.name(), e))
            })?;

        debug!(store = %store.name(), offset = self.offset, rows = rows.len(), "search page");
        if rows.len() < page_size {
            self.exhausted = true;
        }
        self.offset += rows.len();

        let mut entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| self.descriptor.from_row(row))
            .collect();
        self.manager
            .resolver()
            .resolve_batch(self.uow, &mut entities)?;
        self.buffer.extend(entities);
        Ok(())
    }
}

impl Iterator for SearchResults<'_> {
    type Item = CoreResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl FusedIterator for SearchResults<'_> {}
