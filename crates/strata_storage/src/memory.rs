//! In-process state shared by the object storage and search index drivers.
//!
//! Each location (bucket, index namespace) owns one [`Catalog`]. Every
//! connection opened on the location sees the same catalog; writes made
//! inside a native transaction are staged on the connection and applied
//! to the catalog on commit.

use crate::error::{StorageError, StorageResult};
use crate::kind::StoreKind;
use crate::layout::CollectionLayout;
use crate::query::{format_key, RowKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strata_codec::{decode_row, encode_row, Row, Value};

/// How a row is held at rest.
pub(crate) trait Payload: Clone + Send + Sync + 'static {
    fn pack(row: &Row) -> StorageResult<Self>;
    fn unpack(&self) -> StorageResult<Row>;
}

/// Search documents keep the row as-is.
impl Payload for Row {
    fn pack(row: &Row) -> StorageResult<Self> {
        Ok(row.clone())
    }

    fn unpack(&self) -> StorageResult<Row> {
        Ok(self.clone())
    }
}

/// Objects are opaque canonical CBOR payloads.
impl Payload for Vec<u8> {
    fn pack(row: &Row) -> StorageResult<Self> {
        Ok(encode_row(row)?)
    }

    fn unpack(&self) -> StorageResult<Row> {
        Ok(decode_row(self)?)
    }
}

type TableKey = Vec<Value>;

fn table_key(key: &RowKey) -> TableKey {
    key.iter().map(|(_, v)| v.clone()).collect()
}

/// Committed state of one location.
#[derive(Debug)]
pub(crate) struct Catalog<P> {
    layouts: BTreeMap<String, CollectionLayout>,
    tables: BTreeMap<String, BTreeMap<TableKey, P>>,
}

impl<P> Default for Catalog<P> {
    fn default() -> Self {
        Self {
            layouts: BTreeMap::new(),
            tables: BTreeMap::new(),
        }
    }
}

pub(crate) type SharedCatalog<P> = Arc<RwLock<Catalog<P>>>;

/// Location name to catalog, owned by a driver.
#[derive(Debug)]
pub(crate) struct Namespaces<P> {
    inner: Mutex<HashMap<String, SharedCatalog<P>>>,
}

impl<P> Default for Namespaces<P> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<P> Namespaces<P> {
    /// Returns the catalog for a location, creating it on first use.
    pub(crate) fn open(&self, location: &str) -> StorageResult<SharedCatalog<P>> {
        if location.trim().is_empty() {
            return Err(StorageError::InvalidConfig("location must not be empty".into()));
        }
        let mut inner = self.inner.lock();
        let catalog = inner.entry(location.to_string()).or_default();
        Ok(Arc::clone(catalog))
    }
}

/// A write staged inside a native transaction.
#[derive(Debug, Clone)]
enum PendingWrite<P> {
    Put(P),
    Delete,
}

/// A connection over a shared catalog.
#[derive(Debug)]
pub(crate) struct MemoryConnection<P> {
    kind: StoreKind,
    catalog: Option<SharedCatalog<P>>,
    pending: Option<BTreeMap<(String, TableKey), PendingWrite<P>>>,
}

impl<P: Payload> MemoryConnection<P> {
    pub(crate) fn new(kind: StoreKind, catalog: SharedCatalog<P>) -> Self {
        Self {
            kind,
            catalog: Some(catalog),
            pending: None,
        }
    }

    pub(crate) fn kind(&self) -> StoreKind {
        self.kind
    }

    fn catalog(&self) -> StorageResult<&SharedCatalog<P>> {
        self.catalog.as_ref().ok_or(StorageError::Closed)
    }

    fn ensure_known(&self, collection: &str) -> StorageResult<()> {
        if self.catalog()?.read().layouts.contains_key(collection) {
            Ok(())
        } else {
            Err(StorageError::UnknownCollection(collection.to_string()))
        }
    }

    fn lookup(&self, collection: &str, key: &TableKey) -> StorageResult<Option<P>> {
        if let Some(pending) = &self.pending {
            match pending.get(&(collection.to_string(), key.clone())) {
                Some(PendingWrite::Put(payload)) => return Ok(Some(payload.clone())),
                Some(PendingWrite::Delete) => return Ok(None),
                None => {}
            }
        }
        let catalog = self.catalog()?.read();
        Ok(catalog
            .tables
            .get(collection)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn write(&mut self, collection: &str, key: TableKey, write: PendingWrite<P>) -> StorageResult<()> {
        if let Some(pending) = &mut self.pending {
            pending.insert((collection.to_string(), key), write);
            return Ok(());
        }
        let mut catalog = self.catalog()?.write();
        apply(&mut catalog, collection, key, write);
        Ok(())
    }

    pub(crate) fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()> {
        let mut catalog = self.catalog()?.write();
        catalog
            .layouts
            .insert(layout.name.clone(), layout.clone());
        catalog.tables.entry(layout.name.clone()).or_default();
        Ok(())
    }

    pub(crate) fn begin(&mut self) -> StorageResult<()> {
        self.catalog()?;
        if self.pending.is_some() {
            return Err(StorageError::transaction_state("transaction already open"));
        }
        self.pending = Some(BTreeMap::new());
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> StorageResult<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| StorageError::transaction_state("no open transaction"))?;
        let mut catalog = self.catalog()?.write();
        for ((collection, key), write) in pending {
            apply(&mut catalog, &collection, key, write);
        }
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> StorageResult<()> {
        self.pending
            .take()
            .map(|_| ())
            .ok_or_else(|| StorageError::transaction_state("no open transaction"))
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.ensure_known(collection)?;
        let tk = table_key(key);
        if self.lookup(collection, &tk)?.is_some() {
            return Err(StorageError::DuplicateKey {
                collection: collection.to_string(),
                key: format_key(key),
            });
        }
        self.write(collection, tk, PendingWrite::Put(P::pack(row)?))
    }

    pub(crate) fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.ensure_known(collection)?;
        let tk = table_key(key);
        if self.lookup(collection, &tk)?.is_none() {
            return Err(StorageError::NotFound {
                collection: collection.to_string(),
                key: format_key(key),
            });
        }
        self.write(collection, tk, PendingWrite::Put(P::pack(row)?))
    }

    pub(crate) fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        self.ensure_known(collection)?;
        let tk = table_key(key);
        if self.lookup(collection, &tk)?.is_none() {
            return Ok(false);
        }
        self.write(collection, tk, PendingWrite::Delete)?;
        Ok(true)
    }

    pub(crate) fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.ensure_known(collection)?;
        self.lookup(collection, &table_key(key))?
            .map(|payload| payload.unpack())
            .transpose()
    }

    /// Lists the rows whose key starts with `prefix`, in key order, with
    /// this connection's staged writes applied.
    pub(crate) fn scan(
        &self,
        collection: &str,
        prefix: &[Value],
    ) -> StorageResult<(CollectionLayout, Vec<Row>)> {
        let catalog = self.catalog()?.read();
        let layout = catalog
            .layouts
            .get(collection)
            .cloned()
            .ok_or_else(|| StorageError::UnknownCollection(collection.to_string()))?;

        let mut merged: BTreeMap<TableKey, P> = catalog
            .tables
            .get(collection)
            .map(|table| {
                table
                    .range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        drop(catalog);

        if let Some(pending) = &self.pending {
            for ((name, key), write) in pending {
                if name != collection || !key.starts_with(prefix) {
                    continue;
                }
                match write {
                    PendingWrite::Put(payload) => {
                        merged.insert(key.clone(), payload.clone());
                    }
                    PendingWrite::Delete => {
                        merged.remove(key);
                    }
                }
            }
        }

        let rows = merged
            .values()
            .map(P::unpack)
            .collect::<StorageResult<Vec<_>>>()?;
        Ok((layout, rows))
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.catalog.is_some()
    }

    pub(crate) fn close(&mut self) -> StorageResult<()> {
        self.pending = None;
        self.catalog = None;
        Ok(())
    }
}

fn apply<P>(catalog: &mut Catalog<P>, collection: &str, key: TableKey, write: PendingWrite<P>) {
    let table = catalog.tables.entry(collection.to_string()).or_default();
    match write {
        PendingWrite::Put(payload) => {
            table.insert(key, payload);
        }
        PendingWrite::Delete => {
            table.remove(&key);
        }
    }
}
