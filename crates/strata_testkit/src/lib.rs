//! # Strata Testkit
//!
//! Test utilities for Strata.
//!
//! This crate provides:
//! - The Order/Item and shipping fixtures: schemas, configuration and
//!   environments
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn order_round_trip() {
//!     let env = TestEnvironment::memory();
//!     let mut uow = env.unit_of_work("tester");
//!     let mut order = order(1, "acme", vec![item(10, 2)]);
//!     env.manager().create(&mut uow, &mut order, StoreKind::Relational).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use strata_codec::Value;
    pub use strata_core::{Entity, EntityState, Operation, QueryBuilder};
    pub use strata_storage::StoreKind;
}

pub use fixtures::*;
pub use generators::*;
