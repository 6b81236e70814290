//! Transaction context state.

use crate::error::CoreError;
use crate::registry::StoreHandle;
use crate::types::TxKey;
use std::fmt;

/// State of a transaction context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    /// Store chosen, native transaction not yet started.
    Inactive,
    /// Native transaction open.
    Active,
    /// Native transaction committed.
    Committed,
    /// Native transaction rolled back.
    RolledBack,
    /// The native commit failed, or a context sharing the native
    /// transaction rolled it back; only rollback is accepted.
    Error(String),
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Inactive => f.write_str("inactive"),
            TxState::Active => f.write_str("active"),
            TxState::Committed => f.write_str("committed"),
            TxState::RolledBack => f.write_str("rolled back"),
            TxState::Error(cause) => write!(f, "error ({cause})"),
        }
    }
}

/// One `(root type, store kind)` transaction of a unit of work, bound to a
/// single store.
///
/// The native transaction itself belongs to the unit of work's session on
/// that store, which every context of the unit of work bound to the same
/// store shares.
#[derive(Debug)]
pub struct TransactionContext {
    key: TxKey,
    state: TxState,
    store: StoreHandle,
}

impl TransactionContext {
    pub(crate) fn new(key: TxKey, store: StoreHandle) -> Self {
        Self {
            key,
            state: TxState::Inactive,
            store,
        }
    }

    /// The `(root type, store kind)` key.
    #[must_use]
    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> &TxState {
        &self.state
    }

    /// The store the context is bound to.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub(crate) fn set_state(&mut self, state: TxState) {
        self.state = state;
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::transaction(self.key.root_type.clone(), self.key.kind, message)
    }
}
