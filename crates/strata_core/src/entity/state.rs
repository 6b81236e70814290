//! Entity lifecycle states.

use crate::types::Operation;
use std::fmt;

/// Lifecycle state of an entity instance.
///
/// States are moved only by the entity manager:
///
/// ```text
/// New ──create──▶ Synced ──(caller edits)──▶ Updated ──update──▶ Synced
///                   │                                               │
///                   └──────────────delete──▶ Deleted ◀──────────────┘
///                   └──────────deactivate──▶ InActive
/// any ──native failure──▶ Error(cause)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityState {
    /// Origin unknown. Never valid for persistence.
    #[default]
    Unknown,
    /// Created by the caller, not yet persisted.
    New,
    /// Persisted and modified since.
    Updated,
    /// Matches the stored row.
    Synced,
    /// Removed from its store.
    Deleted,
    /// Soft-deleted through the active flag.
    InActive,
    /// The last operation failed.
    Error(String),
}

impl EntityState {
    /// Checks whether `op` may be applied in this state.
    ///
    /// Returns the reason when it may not.
    pub fn check(&self, op: Operation) -> Result<(), String> {
        let allowed = match op {
            Operation::Create => matches!(self, EntityState::New | EntityState::Error(_)),
            Operation::Update | Operation::Delete => matches!(
                self,
                EntityState::Synced | EntityState::Updated | EntityState::Error(_)
            ),
        };
        if allowed {
            Ok(())
        } else {
            Err(format!("cannot {op} an entity in state {self}"))
        }
    }

    /// State after `op` succeeded.
    #[must_use]
    pub fn after(op: Operation) -> Self {
        match op {
            Operation::Create | Operation::Update => EntityState::Synced,
            Operation::Delete => EntityState::Deleted,
        }
    }

    /// Returns true for the error state.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, EntityState::Error(_))
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Unknown => f.write_str("Unknown"),
            EntityState::New => f.write_str("New"),
            EntityState::Updated => f.write_str("Updated"),
            EntityState::Synced => f.write_str("Synced"),
            EntityState::Deleted => f.write_str("Deleted"),
            EntityState::InActive => f.write_str("InActive"),
            EntityState::Error(cause) => write!(f, "Error({cause})"),
        }
    }
}
