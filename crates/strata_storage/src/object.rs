//! Object storage driver.
//!
//! A bucket holds one key namespace per collection. Each object is the
//! canonical CBOR encoding of a row, stored under
//! `<collection>/<key segment>/<key segment>...`. Listings are narrowed by
//! a key prefix and then filtered object by object.

use crate::config::ConnectionConfig;
use crate::connection::{Driver, NativeConnection};
use crate::error::{StorageError, StorageResult};
use crate::kind::StoreKind;
use crate::layout::CollectionLayout;
use crate::memory::{MemoryConnection, Namespaces};
use crate::query::{NativeQuery, RowKey};
use strata_codec::Row;
use tracing::{debug, trace};

/// Returns the object key of a row.
#[must_use]
pub fn object_key(collection: &str, key: &RowKey) -> String {
    let mut parts = vec![collection.to_string()];
    parts.extend(key.iter().map(|(_, v)| v.key_segment()));
    parts.join("/")
}

/// Opens connections to in-process buckets.
///
/// Buckets are keyed by [`ConnectionConfig::location`]; every connection to
/// the same location shares its objects.
#[derive(Debug, Default)]
pub struct ObjectStoreDriver {
    buckets: Namespaces<Vec<u8>>,
}

impl ObjectStoreDriver {
    /// Creates a driver with no buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for ObjectStoreDriver {
    fn kind(&self) -> StoreKind {
        StoreKind::ObjectStorage
    }

    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Box<dyn NativeConnection>> {
        let catalog = self.buckets.open(&config.location)?;
        debug!(bucket = %config.location, "opened object storage connection");
        Ok(Box::new(ObjectConnection {
            bucket: config.location.clone(),
            inner: MemoryConnection::new(StoreKind::ObjectStorage, catalog),
        }))
    }
}

/// A connection to one bucket.
#[derive(Debug)]
pub struct ObjectConnection {
    bucket: String,
    inner: MemoryConnection<Vec<u8>>,
}

impl ObjectConnection {
    /// The bucket this connection writes to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl NativeConnection for ObjectConnection {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()> {
        self.inner.ensure_collection(layout)
    }

    fn begin(&mut self) -> StorageResult<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        trace!(bucket = %self.bucket, object = %object_key(collection, key), "put object");
        self.inner.insert(collection, key, row)
    }

    fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        trace!(bucket = %self.bucket, object = %object_key(collection, key), "replace object");
        self.inner.update(collection, key, row)
    }

    fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        trace!(bucket = %self.bucket, object = %object_key(collection, key), "delete object");
        self.inner.delete(collection, key)
    }

    fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.inner.get(collection, key)
    }

    fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>> {
        let NativeQuery::Objects(listing) = query else {
            return Err(StorageError::unsupported_query(
                StoreKind::ObjectStorage,
                query.to_string(),
            ));
        };
        trace!(bucket = %self.bucket, %query, "list objects");
        let (_, rows) = self.inner.scan(&listing.collection, &listing.key_prefix)?;
        let matching = rows
            .into_iter()
            .filter(|row| listing.filter.matches(row, None));
        Ok(listing.page.apply(matching))
    }

    fn is_valid(&mut self) -> bool {
        self.inner.is_valid()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.inner.close()
    }
}
