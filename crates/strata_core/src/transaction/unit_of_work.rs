//! Units of work.

use super::context::{TransactionContext, TxState};
use crate::error::{CoreError, CoreResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::registry::StoreHandle;
use crate::types::TxKey;
use std::cell::Cell;
use std::marker::PhantomData;
use tracing::{debug, warn};
use uuid::Uuid;

/// The native transaction a unit of work holds on one store, shared by
/// every context bound to that store.
#[derive(Debug)]
struct StoreSession {
    conn: PooledConnection,
    members: Vec<TxKey>,
}

impl StoreSession {
    fn store_name(&self) -> &str {
        self.conn.store().name()
    }

    /// Starts the native transaction unless one is open. A sibling's
    /// commit ends it; the next write starts a fresh one.
    fn ensure_begun(&mut self) -> CoreResult<()> {
        if self.conn.in_transaction() {
            return Ok(());
        }
        self.conn.begin().map_err(|e| {
            CoreError::connection(self.store_name(), format!("begin failed: {e}"))
        })
    }
}

/// The transaction contexts of one logical unit of work.
///
/// A unit of work is created by the caller and passed into every entity
/// manager call. It maps `(root type, store kind)` to the native
/// transaction opened for that pair and is owned by a single execution
/// unit: it can move between threads but cannot be shared (`Send`,
/// `!Sync`).
///
/// Contexts bound to the same store share one native transaction, since a
/// single-writer store cannot hold two write transactions for one caller.
/// Committing one of them commits what all of them staged so far; rolling
/// one back moves the others to `Error`.
///
/// Contexts still open when the unit of work is dropped are rolled back.
#[derive(Debug)]
pub struct UnitOfWork {
    id: Uuid,
    actor: String,
    contexts: Vec<TransactionContext>,
    sessions: Vec<StoreSession>,
    _not_sync: PhantomData<Cell<()>>,
}

impl UnitOfWork {
    /// Starts a unit of work on behalf of `actor`, who is named in audit
    /// records.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            contexts: Vec::new(),
            sessions: Vec::new(),
            _not_sync: PhantomData,
        }
    }

    /// Unique id, for log correlation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The acting principal.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Open contexts, in begin order.
    pub fn contexts(&self) -> impl Iterator<Item = &TransactionContext> {
        self.contexts.iter()
    }

    /// Looks a context up by key.
    #[must_use]
    pub fn context(&self, key: &TxKey) -> Option<&TransactionContext> {
        self.contexts.iter().find(|c| c.key() == key)
    }

    /// Keys of the contexts opened for a root type, in begin order.
    #[must_use]
    pub fn keys_for(&self, root_type: &str) -> Vec<TxKey> {
        self.contexts
            .iter()
            .filter(|c| c.key().root_type == root_type)
            .map(|c| c.key().clone())
            .collect()
    }

    fn position(&self, key: &TxKey) -> Option<usize> {
        self.contexts.iter().position(|c| c.key() == key)
    }

    fn session(&self, store: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.store_name() == store)
    }

    /// Returns the connection of the active context for `key` on `store`,
    /// beginning the context if none exists.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if the existing context is not active or
    /// is bound to another store of the same kind, and a connection error
    /// if no connection is available or the native begin fails.
    pub(crate) fn begin(
        &mut self,
        pool: &ConnectionPool,
        store: &StoreHandle,
        key: TxKey,
    ) -> CoreResult<&mut PooledConnection> {
        if let Some(pos) = self.position(&key) {
            let ctx = &self.contexts[pos];
            if *ctx.state() != TxState::Active {
                return Err(ctx.error(format!("context is {}; roll it back first", ctx.state())));
            }
            if ctx.store().name() != store.name() {
                return Err(ctx.error(format!(
                    "context is bound to store {}, not {}",
                    ctx.store().name(),
                    store.name()
                )));
            }
        }

        let s = match self.session(store.name()) {
            Some(s) => s,
            None => {
                let conn = pool.acquire(store)?;
                self.sessions.push(StoreSession {
                    conn,
                    members: Vec::new(),
                });
                self.sessions.len() - 1
            }
        };
        let session = &mut self.sessions[s];
        if let Err(e) = session.ensure_begun() {
            if session.members.is_empty() {
                self.sessions.remove(s);
            }
            return Err(e);
        }

        if !session.members.contains(&key) {
            session.members.push(key.clone());
            let shared = session.members.len() > 1;
            let mut ctx = TransactionContext::new(key, store.clone());
            ctx.set_state(TxState::Active);
            debug!(unit = %self.id, key = %ctx.key(), store = %store.name(), shared, "transaction begun");
            self.contexts.push(ctx);
        }
        Ok(&mut self.sessions[s].conn)
    }

    /// Commits and releases the context for `key`.
    ///
    /// The native commit covers every context sharing the store; those
    /// stay active. On a native failure the context stays, in state
    /// `Error`.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if no context exists, it is not active,
    /// or the native commit fails.
    pub(crate) fn commit(&mut self, key: &TxKey) -> CoreResult<String> {
        let pos = self.position(key).ok_or_else(|| missing(key))?;
        let ctx = &mut self.contexts[pos];
        if *ctx.state() != TxState::Active {
            return Err(ctx.error(format!("cannot commit a context that is {}", ctx.state())));
        }
        let store = ctx.store().name().to_string();
        let s = self.session(&store).ok_or_else(|| missing(key))?;
        let session = &mut self.sessions[s];
        let result = if session.conn.in_transaction() {
            session.conn.commit()
        } else {
            Ok(())
        };

        let ctx = &mut self.contexts[pos];
        if let Err(e) = result {
            ctx.set_state(TxState::Error(e.to_string()));
            return Err(ctx.error(format!("commit failed on store {store}: {e}")));
        }
        ctx.set_state(TxState::Committed);
        debug!(unit = %self.id, %key, %store, "transaction committed");
        self.contexts.remove(pos);
        self.leave(s, key);
        Ok(store)
    }

    /// Rolls back and releases the context for `key`.
    ///
    /// The context is released even when the native rollback fails, so a
    /// second rollback of the same key reports a missing context. Other
    /// contexts sharing the store lose their staged writes and move to
    /// `Error`.
    ///
    /// # Errors
    ///
    /// Returns a transaction error if no context exists or the native
    /// rollback fails.
    pub(crate) fn rollback(&mut self, key: &TxKey) -> CoreResult<()> {
        let pos = self.position(key).ok_or_else(|| missing(key))?;
        let ctx = &self.contexts[pos];
        if !matches!(ctx.state(), TxState::Active | TxState::Error(_)) {
            return Err(ctx.error(format!("cannot roll back a context that is {}", ctx.state())));
        }
        let store = ctx.store().name().to_string();

        let mut result = Ok(());
        if let Some(s) = self.session(&store) {
            let session = &mut self.sessions[s];
            if session.conn.in_transaction() {
                result = session.conn.rollback();
                let siblings: Vec<TxKey> =
                    session.members.iter().filter(|k| *k != key).cloned().collect();
                for sibling in self.contexts.iter_mut().filter(|c| siblings.contains(c.key())) {
                    if *sibling.state() == TxState::Active {
                        warn!(unit = %self.id, key = %sibling.key(), by = %key, "shared transaction rolled back");
                        sibling.set_state(TxState::Error(format!("rolled back with {key}")));
                    }
                }
            }
            self.leave(s, key);
        }

        let mut ctx = self.contexts.remove(pos);
        ctx.set_state(TxState::RolledBack);
        debug!(unit = %self.id, %key, %store, "transaction rolled back");
        result.map_err(|e| ctx.error(format!("rollback failed on store {store}: {e}")))
    }

    /// Removes `key` from a session, releasing its connection once no
    /// context uses it.
    fn leave(&mut self, s: usize, key: &TxKey) {
        let session = &mut self.sessions[s];
        session.members.retain(|k| k != key);
        if session.members.is_empty() {
            self.sessions.remove(s);
        }
    }

    /// Runs `f` on the unit of work's connection to `store` when it holds
    /// one, so reads see the staged writes; otherwise on a freshly acquired
    /// connection that is released afterwards.
    pub(crate) fn with_connection<T>(
        &mut self,
        pool: &ConnectionPool,
        store: &StoreHandle,
        f: impl FnOnce(&mut PooledConnection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        match self.session(store.name()) {
            Some(s) => f(&mut self.sessions[s].conn),
            None => {
                let mut conn = pool.acquire(store)?;
                f(&mut conn)
            }
        }
    }
}

fn missing(key: &TxKey) -> CoreError {
    CoreError::transaction(
        key.root_type.clone(),
        key.kind,
        "no transaction context is open",
    )
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        for ctx in self.contexts.drain(..) {
            warn!(unit = %self.id, key = %ctx.key(), state = %ctx.state(), "unit of work dropped with an open context; rolling back");
        }
        for mut session in self.sessions.drain(..) {
            if session.conn.in_transaction() {
                if let Err(e) = session.conn.rollback() {
                    warn!(unit = %self.id, store = %session.store_name(), error = %e, "rollback on drop failed");
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StoreRegistry;
    use std::collections::BTreeMap;
    use strata_storage::{ConnectionConfig, StoreKind};

    fn setup(location: &str) -> (ConnectionPool, StoreRegistry, StoreHandle) {
        let pool = ConnectionPool::new();
        let registry = StoreRegistry::new(BTreeMap::new(), &pool);
        let store = registry
            .register("idx", StoreKind::SearchIndex, ConnectionConfig::new(location))
            .unwrap();
        (pool, registry, store)
    }

    fn key() -> TxKey {
        TxKey::new("Order", StoreKind::SearchIndex)
    }

    #[test]
    fn begin_reuses_active_context() {
        let (pool, _registry, store) = setup("uow-reuse");
        let mut uow = UnitOfWork::new("tester");

        uow.begin(&pool, &store, key()).unwrap();
        uow.begin(&pool, &store, key()).unwrap();

        assert_eq!(uow.contexts().count(), 1);
        assert_eq!(store.stats().begins, 1);
        assert_eq!(pool.stats().in_use(), 1);
    }

    #[test]
    fn commit_releases_context() {
        let (pool, _registry, store) = setup("uow-commit");
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &store, key()).unwrap();

        assert_eq!(uow.commit(&key()).unwrap(), "idx");
        assert!(uow.context(&key()).is_none());
        assert_eq!(pool.stats().in_use(), 0);

        let err = uow.commit(&key()).unwrap_err();
        assert!(err.is_transaction());
    }

    #[test]
    fn second_rollback_fails() {
        let (pool, _registry, store) = setup("uow-rollback");
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &store, key()).unwrap();

        uow.rollback(&key()).unwrap();
        assert!(uow.rollback(&key()).unwrap_err().is_transaction());
        assert_eq!(store.stats().rollbacks, 1);
        assert_eq!(pool.stats().released, 1);
    }

    fn other_key() -> TxKey {
        TxKey::new("Item", StoreKind::SearchIndex)
    }

    #[test]
    fn contexts_on_one_store_share_a_transaction() {
        let (pool, _registry, store) = setup("uow-shared");
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &store, key()).unwrap();
        uow.begin(&pool, &store, other_key()).unwrap();

        assert_eq!(uow.contexts().count(), 2);
        assert_eq!(store.stats().begins, 1);
        assert_eq!(pool.stats().in_use(), 1);
    }

    #[test]
    fn commit_leaves_sharing_contexts_active() {
        let (pool, _registry, store) = setup("uow-shared-commit");
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &store, key()).unwrap();
        uow.begin(&pool, &store, other_key()).unwrap();

        uow.commit(&key()).unwrap();
        assert_eq!(
            *uow.context(&other_key()).unwrap().state(),
            TxState::Active
        );
        assert_eq!(pool.stats().in_use(), 1);

        // The next write starts a fresh native transaction.
        uow.begin(&pool, &store, other_key()).unwrap();
        assert_eq!(store.stats().begins, 2);
        uow.commit(&other_key()).unwrap();
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn rollback_fails_sharing_contexts() {
        let (pool, _registry, store) = setup("uow-shared-rollback");
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &store, key()).unwrap();
        uow.begin(&pool, &store, other_key()).unwrap();

        uow.rollback(&key()).unwrap();
        assert!(matches!(
            uow.context(&other_key()).unwrap().state(),
            TxState::Error(_)
        ));
        assert!(uow.commit(&other_key()).unwrap_err().is_transaction());
        assert!(uow
            .begin(&pool, &store, other_key())
            .unwrap_err()
            .is_transaction());

        uow.rollback(&other_key()).unwrap();
        assert!(uow.contexts().next().is_none());
        assert_eq!(store.stats().rollbacks, 1);
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn context_is_bound_to_one_store() {
        let pool = ConnectionPool::new();
        let registry = StoreRegistry::new(BTreeMap::new(), &pool);
        let a = registry
            .register("a", StoreKind::SearchIndex, ConnectionConfig::new("uow-a"))
            .unwrap();
        let b = registry
            .register("b", StoreKind::SearchIndex, ConnectionConfig::new("uow-b"))
            .unwrap();
        let mut uow = UnitOfWork::new("tester");
        uow.begin(&pool, &a, key()).unwrap();
        assert!(uow.begin(&pool, &b, key()).unwrap_err().is_transaction());
    }

    #[test]
    fn drop_rolls_back_open_contexts() {
        let (pool, _registry, store) = setup("uow-drop");
        {
            let mut uow = UnitOfWork::new("tester");
            uow.begin(&pool, &store, key()).unwrap();
        }
        assert_eq!(store.stats().rollbacks, 1);
        assert_eq!(pool.stats().in_use(), 0);
    }

    #[test]
    fn unit_of_work_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<UnitOfWork>();
    }
}
