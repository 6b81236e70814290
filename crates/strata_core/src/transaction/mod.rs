//! Transaction demarcation across stores.
//!
//! There is no shared transaction coordinator. A [`UnitOfWork`] holds one
//! [`TransactionContext`] per `(root type, store kind)`, each wrapping a
//! native transaction on a single store:
//!
//! ```text
//! Inactive ──begin──▶ Active ──commit──▶ Committed
//!                       │  └──rollback──▶ RolledBack
//!                       └─commit fails─▶ Error ──rollback──▶ RolledBack
//! ```
//!
//! Committing several contexts is not atomic: a failure after some
//! contexts committed is reported with the stores that already did.

mod context;
mod unit_of_work;

pub use context::{TransactionContext, TxState};
pub use unit_of_work::UnitOfWork;
