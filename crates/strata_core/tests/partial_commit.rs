//! Commit failures across stores, using a search index whose commits can
//! be made to fail.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_codec::{Row, Value};
use strata_core::{
    ConnectionPool, CoreError, EntityManager, EntityState, MemoryAuditSink, StoreRegistry,
    UnitOfWork,
};
use strata_storage::{
    CollectionLayout, ConnectionConfig, Driver, NativeConnection, NativeQuery, RowKey,
    SearchIndexDriver, StorageError, StorageResult, StoreKind,
};
use strata_testkit::prelude::*;
use uuid::Uuid;

struct FlakyDriver {
    inner: SearchIndexDriver,
    fail_commits: Arc<AtomicBool>,
}

impl Driver for FlakyDriver {
    fn kind(&self) -> StoreKind {
        StoreKind::SearchIndex
    }

    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Box<dyn NativeConnection>> {
        Ok(Box::new(FlakyConnection {
            inner: self.inner.connect(config)?,
            fail_commits: Arc::clone(&self.fail_commits),
        }))
    }
}

struct FlakyConnection {
    inner: Box<dyn NativeConnection>,
    fail_commits: Arc<AtomicBool>,
}

impl NativeConnection for FlakyConnection {
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
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Unsupported("commit refused".into()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.inner.insert(collection, key, row)
    }

    fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.inner.update(collection, key, row)
    }

    fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        self.inner.delete(collection, key)
    }

    fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.inner.get(collection, key)
    }

    fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>> {
        self.inner.query(query)
    }

    fn is_valid(&mut self) -> bool {
        self.inner.is_valid()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.inner.close()
    }
}

struct Harness {
    manager: EntityManager,
    fail_commits: Arc<AtomicBool>,
}

fn harness() -> Harness {
    init_tracing();
    let schema = Arc::new(order_schema(&ItemsCascade::default()));
    let pool = Arc::new(ConnectionPool::new());
    let mappings = BTreeMap::from([
        ("Order".to_string(), vec![StoreKind::Relational]),
        ("Item".to_string(), vec![StoreKind::SearchIndex]),
    ]);
    let registry = Arc::new(StoreRegistry::new(mappings, &pool));
    let fail_commits = Arc::new(AtomicBool::new(false));

    let orders = registry
        .register(
            ORDERS_DB,
            StoreKind::Relational,
            ConnectionConfig::new(format!("memory:partial-{}", Uuid::new_v4())),
        )
        .unwrap();
    let items = registry
        .register_with_driver(
            ITEMS_SEARCH,
            Arc::new(FlakyDriver {
                inner: SearchIndexDriver::new(),
                fail_commits: Arc::clone(&fail_commits),
            }),
            ConnectionConfig::new("partial-items"),
        )
        .unwrap();
    for (store, entity_type) in [(&orders, "Order"), (&items, "Item")] {
        let descriptor = schema.descriptor(entity_type).unwrap();
        let mut conn = pool.acquire(store).unwrap();
        conn.ensure_collection(&descriptor.layout(store.kind()))
            .unwrap();
    }

    let manager = EntityManager::new(
        schema,
        registry,
        pool,
        Arc::new(MemoryAuditSink::new()),
        16,
    );
    Harness {
        manager,
        fail_commits,
    }
}

#[test]
fn later_commit_failure_is_a_partial_commit() {
    let h = harness();
    let mut uow = UnitOfWork::new("tester");
    let mut created = order(1, "acme", vec![item(1, 1)]);
    h.manager
        .create(&mut uow, &mut created, StoreKind::Relational)
        .unwrap();
    assert_eq!(created.state(), &EntityState::Synced);

    h.fail_commits.store(true, Ordering::SeqCst);
    let err = h.manager.commit_all(&mut uow, "Order").unwrap_err();
    match err {
        CoreError::PartialCommit {
            root_type,
            committed,
            failed_store,
            source,
        } => {
            assert_eq!(root_type, "Order");
            assert_eq!(committed, [ORDERS_DB]);
            assert_eq!(failed_store, ITEMS_SEARCH);
            assert!(source.is_transaction());
        }
        other => panic!("expected a partial commit, got {other}"),
    }

    // The failed context stays until it is rolled back.
    assert_eq!(uow.keys_for("Order").len(), 1);
    h.manager.rollback_all(&mut uow, "Order").unwrap();
    assert!(uow.keys_for("Order").is_empty());

    let mut reader = UnitOfWork::new("reader");
    let stored = h
        .manager
        .find(&mut reader, "Order", &[Value::from(1)], StoreKind::Relational)
        .unwrap()
        .unwrap();
    assert!(stored.many("items").is_empty());
}

#[test]
fn first_commit_failure_is_returned_as_is() {
    let h = harness();
    let mut uow = UnitOfWork::new("tester");
    let mut lone = item(5, 1).with("orderId", 9);
    h.manager
        .create(&mut uow, &mut lone, StoreKind::SearchIndex)
        .unwrap();

    h.fail_commits.store(true, Ordering::SeqCst);
    let err = h.manager.commit_all(&mut uow, "Item").unwrap_err();
    assert!(err.is_transaction());
    assert!(!matches!(err, CoreError::PartialCommit { .. }));

    h.fail_commits.store(false, Ordering::SeqCst);
    h.manager.rollback_all(&mut uow, "Item").unwrap();
}
