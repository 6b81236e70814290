//! # Strata Core
//!
//! Polyglot entity persistence for Strata.
//!
//! One logical data model is stored across relational databases, object
//! storage and search indices through one entity lifecycle API.
//!
//! This crate provides:
//! - [`StoreRegistry`] mapping entity types to registered stores
//! - [`ConnectionPool`] with scoped acquisition and store discovery
//! - [`EntityManager`] for CRUD, search and per-store transaction demarcation
//! - [`ReferenceResolver`] emulating joins across store boundaries
//! - [`QueryBuilder`] translating one predicate DSL into each native query
//!   language
//!
//! ## Transactions
//!
//! There is no distributed commit. A [`UnitOfWork`] holds one transaction
//! context per `(root type, store kind)`; each commits or rolls back on its
//! own, and a failure after some stores committed is reported as
//! [`CoreError::PartialCommit`] for the caller to compensate.
//!
//! ## Example
//!
//! ```rust,ignore
//! let env = Environment::open(config, schema)?;
//! let manager = env.manager();
//! let mut uow = env.unit_of_work("alice");
//!
//! manager.create(&mut uow, &mut order, StoreKind::Relational)?;
//! manager.commit_all(&mut uow, "Order")?;
//!
//! let open = QueryBuilder::new().equals("status", "open").build()?;
//! for order in manager.search(&mut uow, &open, "Order", StoreKind::Relational)? {
//!     println!("{:?}", order?.many("items"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod config;
mod entity;
mod environment;
mod error;
mod manager;
mod pool;
mod query;
mod registry;
mod repository;
mod resolver;
mod schema;
mod search;
mod stats;
mod transaction;
mod types;
mod validation;

pub use audit::{
    AuditError, AuditRecord, AuditSink, ChannelAuditSink, MemoryAuditSink, TracingAuditSink,
};
pub use config::{EnvironmentConfig, StoreConfig};
pub use entity::{
    Binding, Entity, EntityDescriptor, EntityMapping, EntityState, FieldDescriptor, FieldRole,
    IndexSettings, ReferenceDecl, Validator,
};
pub use environment::Environment;
pub use error::{CoreError, CoreResult, Violation};
pub use manager::EntityManager;
pub use pool::{CatalogueEntry, CatalogueRow, ConnectionPool, DiscoveredStore, PooledConnection};
pub use query::{paged, render, Comparison, PathResolver, Predicate, QueryBuilder, Term};
pub use registry::{Store, StoreHandle, StoreRegistry};
pub use repository::Repository;
pub use resolver::ReferenceResolver;
pub use schema::Schema;
pub use search::SearchResults;
pub use stats::{PoolStats, PoolStatsSnapshot, StoreStats, StoreStatsSnapshot};
pub use transaction::{TransactionContext, TxState, UnitOfWork};
pub use types::{Cardinality, Operation, TxKey};
