//! Store registry, pooling and typed repository behaviour through an
//! open environment.

use std::sync::Arc;
use strata_codec::{Row, Value};
use strata_core::{
    CatalogueRow, CoreError, CoreResult, Entity, EntityDescriptor, EntityMapping, Environment,
    MemoryAuditSink, Predicate, QueryBuilder, Repository,
};
use strata_storage::{
    CollectionLayout, ConnectionConfig, FieldLayout, NativeQuery, PoolPolicy, SqlStatement,
    StoreKind,
};
use strata_testkit::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct Line {
    product_id: i64,
    quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
struct Order {
    id: i64,
    customer: String,
    lines: Vec<Line>,
}

impl EntityMapping for Order {
    const ENTITY_TYPE: &'static str = "Order";

    fn descriptor() -> EntityDescriptor {
        order_descriptor(&ItemsCascade::default())
    }

    fn to_entity(&self) -> Entity {
        let items = self
            .lines
            .iter()
            .map(|l| item(l.product_id, l.quantity))
            .collect();
        order(self.id, &self.customer, items)
    }

    fn from_entity(entity: &Entity) -> CoreResult<Self> {
        let int = |e: &Entity, field: &str| {
            e.get(field)
                .and_then(Value::as_integer)
                .ok_or_else(|| CoreError::configuration(format!("{field} is missing")))
        };
        let customer = entity
            .get("customer")
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::configuration("customer is missing"))?;
        let lines = entity
            .many("items")
            .iter()
            .map(|i| {
                Ok(Line {
                    product_id: int(i, "productId")?,
                    quantity: int(i, "quantity")?,
                })
            })
            .collect::<CoreResult<_>>()?;
        Ok(Self {
            id: int(entity, "orderId")?,
            customer: customer.to_string(),
            lines,
        })
    }
}

fn acme(id: i64) -> Order {
    Order {
        id,
        customer: "acme".into(),
        lines: vec![
            Line {
                product_id: 4,
                quantity: 2,
            },
            Line {
                product_id: 9,
                quantity: 1,
            },
        ],
    }
}

#[test]
fn repository_round_trips_typed_orders() {
    let env = TestEnvironment::memory();
    let orders: Repository<'_, Order> = Repository::new(env.manager()).unwrap();
    assert_eq!(orders.kind(), StoreKind::Relational);

    let mut uow = env.unit_of_work("clerk");
    let saved = orders.create(&mut uow, &acme(1)).unwrap();
    assert_eq!(saved, acme(1));
    env.manager().commit_all(&mut uow, Order::ENTITY_TYPE).unwrap();

    let found = orders.find(&mut uow, &[Value::from(1)]).unwrap();
    assert_eq!(found, Some(acme(1)));
    assert!(orders.find(&mut uow, &[Value::from(2)]).unwrap().is_none());
}

#[test]
fn repository_update_and_search() {
    let env = TestEnvironment::memory();
    let orders: Repository<'_, Order> = Repository::new(env.manager()).unwrap();
    let mut uow = env.unit_of_work("clerk");
    orders.create(&mut uow, &acme(1)).unwrap();
    orders.create(&mut uow, &acme(2)).unwrap();

    let mut renamed = acme(2);
    renamed.customer = "globex".into();
    renamed.lines.clear();
    orders.update(&mut uow, &renamed).unwrap();
    env.manager().commit_all(&mut uow, Order::ENTITY_TYPE).unwrap();

    let globex = QueryBuilder::new()
        .equals("customer", "globex")
        .build()
        .unwrap();
    let found = orders.search(&mut uow, &globex).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 2);
    // Without orphan removal the stored items stay.
    assert_eq!(found[0].lines.len(), 2);

    assert_eq!(orders.search(&mut uow, &Predicate::all()).unwrap().len(), 2);
}

#[test]
fn repository_delete_and_deactivate() {
    let env = TestEnvironment::memory();
    let orders: Repository<'_, Order> = Repository::new(env.manager()).unwrap();
    let mut uow = env.unit_of_work("clerk");
    orders.create(&mut uow, &acme(1)).unwrap();
    orders.create(&mut uow, &acme(2)).unwrap();

    orders.deactivate(&mut uow, &acme(1)).unwrap();
    orders.delete(&mut uow, &acme(2)).unwrap();
    env.manager().commit_all(&mut uow, Order::ENTITY_TYPE).unwrap();

    let stored = env
        .manager()
        .find(&mut uow, "Order", &[Value::from(1)], StoreKind::Relational)
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("active").and_then(Value::as_bool), Some(false));
    assert!(orders.find(&mut uow, &[Value::from(2)]).unwrap().is_none());
}

#[test]
fn repository_requires_a_mapped_type() {
    struct Invoice;

    impl EntityMapping for Invoice {
        const ENTITY_TYPE: &'static str = "Invoice";

        fn descriptor() -> EntityDescriptor {
            EntityDescriptor::new(Self::ENTITY_TYPE)
        }

        fn to_entity(&self) -> Entity {
            Entity::new(Self::ENTITY_TYPE)
        }

        fn from_entity(_: &Entity) -> CoreResult<Self> {
            Ok(Invoice)
        }
    }

    let env = TestEnvironment::memory();
    let err = Repository::<Invoice>::new(env.manager()).err().unwrap();
    assert!(matches!(err, CoreError::Configuration { .. }));
}

#[test]
fn exhausted_fail_fast_pool_is_a_connection_error() {
    init_tracing();
    let orders = ConnectionConfig::new(format!("memory:orders-{}", Uuid::new_v4()))
        .pool_size(1)
        .pool_policy(PoolPolicy::FailFast);
    let env = Environment::open_with(
        order_config_at(orders),
        order_schema(&ItemsCascade::default()),
        Arc::new(MemoryAuditSink::new()),
    )
    .unwrap();

    let mut first = env.unit_of_work("first");
    let mut second = env.unit_of_work("second");
    env.manager()
        .create(&mut first, &mut order(1, "acme", Vec::new()), StoreKind::Relational)
        .unwrap();

    let err = env
        .manager()
        .create(&mut second, &mut order(2, "acme", Vec::new()), StoreKind::Relational)
        .unwrap_err();
    assert!(matches!(err, CoreError::Connection { .. }));
    assert_eq!(env.pool().stats().exhausted, 1);

    env.manager().commit_all(&mut first, "Order").unwrap();
    env.manager()
        .create(&mut second, &mut order(2, "acme", Vec::new()), StoreKind::Relational)
        .unwrap();
}

fn seed_buckets(env: &Environment) {
    let seed = env.registry().resolve_by_name(ORDERS_DB).unwrap();
    let mut conn = env.pool().acquire(&seed).unwrap();
    let layout = CollectionLayout {
        name: "buckets".into(),
        key_fields: vec!["name".into()],
        fields: ["name", "location", "pool_size"]
            .into_iter()
            .map(|n| FieldLayout {
                name: n.into(),
                analyzer: None,
            })
            .collect(),
    };
    conn.ensure_collection(&layout).unwrap();
    for (name, size) in [("archive-eu", 2), ("archive-us", 3)] {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row.insert("location".into(), Value::from(format!("{name}-{}", Uuid::new_v4())));
        row.insert("pool_size".into(), Value::Integer(size));
        let key = vec![("name".to_string(), Value::from(name))];
        conn.insert("buckets", &key, &row).unwrap();
    }
}

fn catalogue() -> NativeQuery {
    NativeQuery::Sql(SqlStatement::new(
        "SELECT * FROM \"buckets\" ORDER BY \"name\"",
        vec![],
    ))
}

#[test]
fn discovered_stores_are_mounted() {
    let env = TestEnvironment::memory();
    seed_buckets(&env);

    let mounted = env
        .discover::<CatalogueRow, _>(ORDERS_DB, &catalogue(), StoreKind::ObjectStorage, |row| {
            row.name.ends_with("-eu")
        })
        .unwrap();

    assert_eq!(mounted.len(), 1);
    let archive = env.registry().resolve_by_name("archive-eu").unwrap();
    assert_eq!(archive.kind(), StoreKind::ObjectStorage);
    assert_eq!(archive.config().pool_size, 2);
    assert!(env.registry().resolve_by_name("archive-us").is_err());
    assert_eq!(env.pool().stats().in_use(), 0);
}

#[test]
fn mounting_twice_is_rejected() {
    let env = TestEnvironment::memory();
    seed_buckets(&env);
    let accept_all = |_: &CatalogueRow| true;

    env.discover::<CatalogueRow, _>(ORDERS_DB, &catalogue(), StoreKind::ObjectStorage, accept_all)
        .unwrap();
    assert!(env
        .discover::<CatalogueRow, _>(ORDERS_DB, &catalogue(), StoreKind::ObjectStorage, accept_all)
        .is_err());
}

#[test]
fn shut_down_environment_refuses_discovery() {
    let env = TestEnvironment::memory();
    env.shutdown();
    assert!(!env.is_open());

    let err = env
        .discover::<CatalogueRow, _>(ORDERS_DB, &catalogue(), StoreKind::ObjectStorage, |_| true)
        .unwrap_err();
    assert!(matches!(err, CoreError::Configuration { .. }));
}

#[test]
fn shut_down_environment_resolves_no_stores() {
    let env = TestEnvironment::memory();
    let orders_db = env.registry().resolve_by_name(ORDERS_DB).unwrap();
    env.shutdown();

    let mut uow = env.unit_of_work("late");
    let err = env
        .manager()
        .create(&mut uow, &mut order(1, "acme", Vec::new()), StoreKind::Relational)
        .unwrap_err();
    assert!(matches!(err, CoreError::Configuration { .. }));

    // Handles taken before shutdown no longer hand out connections.
    assert!(matches!(
        env.pool().acquire(&orders_db),
        Err(CoreError::Connection { .. })
    ));
}
