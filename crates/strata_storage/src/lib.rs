//! # Strata Storage
//!
//! Native store drivers and native query representations for Strata.
//!
//! A store is one configured backend instance of some [`StoreKind`]. This
//! crate knows nothing about entities: drivers persist [`Row`]s under
//! [`RowKey`]s in named collections and execute queries written in their
//! own language.
//!
//! ## Store Kinds
//!
//! - [`StoreKind::Relational`] - SQLite through [`SqliteDriver`], queried with [`SqlStatement`]
//! - [`StoreKind::ObjectStorage`] - [`ObjectStoreDriver`], queried with [`ObjectQuery`]
//! - [`StoreKind::SearchIndex`] - [`SearchIndexDriver`], queried with [`SearchRequest`]
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{CollectionLayout, ConnectionConfig, Driver, SqliteDriver};
//! use strata_codec::{Row, Value};
//!
//! let driver = SqliteDriver::new();
//! let mut conn = driver.connect(&ConnectionConfig::new("memory:doc-example")).unwrap();
//! conn.ensure_collection(&CollectionLayout {
//!     name: "notes".into(),
//!     key_fields: vec!["id".into()],
//!     fields: vec![],
//! }).unwrap();
//!
//! let key = vec![("id".to_string(), Value::Integer(1))];
//! let mut row = Row::new();
//! row.insert("id".into(), Value::Integer(1));
//! conn.insert("notes", &key, &row).unwrap();
//! assert_eq!(conn.get("notes", &key).unwrap(), Some(row));
//! ```
//!
//! [`Row`]: strata_codec::Row

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod kind;
mod layout;
mod memory;
mod object;
mod query;
mod search;
mod sqlite;

pub use config::{ConnectionConfig, PoolPolicy};
pub use connection::{default_driver, Driver, NativeConnection};
pub use error::{StorageError, StorageResult};
pub use kind::StoreKind;
pub use layout::{Analyzer, CollectionLayout, FieldLayout};
pub use object::{object_key, ObjectConnection, ObjectStoreDriver};
pub use query::{
    format_key, quote_identifier, FilterNode, NativeQuery, ObjectQuery, Page, RowKey,
    SearchRequest, SqlStatement,
};
pub use search::{SearchConnection, SearchIndexDriver};
pub use sqlite::{SqliteConnection, SqliteDriver};
