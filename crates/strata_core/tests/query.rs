//! Searching, paging and predicate translation against the fixture.

use proptest::prelude::*;
use std::sync::Arc;
use strata_codec::Value;
use strata_core::{Entity, Environment, MemoryAuditSink, QueryBuilder};
use strata_storage::StoreKind;
use strata_testkit::prelude::*;

fn seed(env: &Environment, orders: &[(i64, &str, Vec<Entity>)]) {
    let mut uow = env.unit_of_work("seeder");
    for (id, customer, items) in orders {
        let mut created = order(*id, customer, items.clone());
        env.manager()
            .create(&mut uow, &mut created, StoreKind::Relational)
            .unwrap();
    }
    env.manager().commit_all(&mut uow, "Order").unwrap();
}

fn ids(found: &[Entity], field: &str) -> Vec<i64> {
    found
        .iter()
        .map(|e| e.get(field).and_then(Value::as_integer).unwrap())
        .collect()
}

#[test]
fn search_filters_on_local_fields() {
    let env = TestEnvironment::memory();
    seed(
        &env,
        &[
            (1, "acme", vec![item(1, 1)]),
            (2, "globex", vec![item(1, 4)]),
            (3, "acme", Vec::new()),
        ],
    );

    let predicate = QueryBuilder::new()
        .equals("customer", "acme")
        .build()
        .unwrap();
    let mut uow = env.unit_of_work("tester");
    let found: Vec<Entity> = env
        .manager()
        .search(&mut uow, &predicate, "Order", StoreKind::Relational)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(ids(&found, "orderId"), [1, 3]);
    assert_eq!(found[0].many("items").len(), 1);
    assert!(found[1].many("items").is_empty());
}

#[test]
fn search_follows_paths_into_another_store() {
    let env = TestEnvironment::memory();
    seed(
        &env,
        &[
            (1, "acme", vec![item(1, 1), item(2, 1)]),
            (2, "globex", vec![item(3, 1)]),
            (3, "initech", vec![item(2, 8)]),
        ],
    );

    let predicate = QueryBuilder::new()
        .equals("items.productId", 2)
        .build()
        .unwrap();
    let mut uow = env.unit_of_work("tester");
    let found: Vec<Entity> = env
        .manager()
        .search(&mut uow, &predicate, "Order", StoreKind::Relational)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids(&found, "orderId"), [1, 3]);

    let none = QueryBuilder::new()
        .equals("items.productId", 99)
        .build()
        .unwrap();
    let count = env
        .manager()
        .search(&mut uow, &none, "Order", StoreKind::Relational)
        .unwrap()
        .count();
    assert_eq!(count, 0);
}

#[test]
fn search_on_the_index_uses_its_analyzer() {
    let env = TestEnvironment::memory();
    seed(&env, &[(1, "acme", vec![item(1, 1), item(2, 1)])]);

    let predicate = QueryBuilder::new().equals("sku", "SKU2").build().unwrap();
    let mut uow = env.unit_of_work("tester");
    let found: Vec<Entity> = env
        .manager()
        .search(&mut uow, &predicate, "Item", StoreKind::SearchIndex)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ids(&found, "productId"), [2]);
}

#[test]
fn search_pages_lazily_and_rewinds() {
    let audit = Arc::new(MemoryAuditSink::new());
    let env = Environment::open_with(
        order_config().search_batch_size(2),
        order_schema(&ItemsCascade::default()),
        audit,
    )
    .unwrap();
    let orders: Vec<_> = (1..=5).map(|id| (id, "acme", vec![item(id, 1)])).collect();
    seed(&env, &orders);

    let orders_db = env.registry().resolve_by_name(ORDERS_DB).unwrap();
    let items_search = env.registry().resolve_by_name(ITEMS_SEARCH).unwrap();
    let (orders_before, items_before) = (orders_db.stats().queries, items_search.stats().queries);

    let mut uow = env.unit_of_work("tester");
    let mut results = env
        .manager()
        .search(&mut uow, &QueryBuilder::new().build().unwrap(), "Order", StoreKind::Relational)
        .unwrap();

    let first = results.next().unwrap().unwrap();
    assert_eq!(first.get("orderId"), Some(&Value::Integer(1)));
    assert_eq!(orders_db.stats().queries - orders_before, 1);

    let rest: Vec<Entity> = results.by_ref().collect::<Result<_, _>>().unwrap();
    assert_eq!(ids(&rest, "orderId"), [2, 3, 4, 5]);
    assert!(rest.iter().all(|o| o.many("items").len() == 1));
    assert!(results.next().is_none());
    assert_eq!(orders_db.stats().queries - orders_before, 3);
    assert_eq!(items_search.stats().queries - items_before, 3);

    results.rewind();
    assert_eq!(results.count(), 5);
}

#[test]
fn builder_errors_surface_before_any_query() {
    let env = TestEnvironment::memory();
    let mut uow = env.unit_of_work("tester");
    let builder = QueryBuilder::new().group().equals("status", "open");
    let err = env
        .manager()
        .parse(&mut uow, &builder, "Order", StoreKind::Relational)
        .unwrap_err();
    assert!(matches!(err, strata_core::CoreError::InvalidQuery { .. }));
    assert_eq!(env.queries(ORDERS_DB), 0);
}

#[test]
fn parse_renders_relational_sql() {
    let env = TestEnvironment::memory();
    let mut uow = env.unit_of_work("tester");
    let builder = QueryBuilder::new()
        .equals("status", "open")
        .not_group()
        .equals("customer", "acme")
        .end();
    let query = env
        .manager()
        .parse(&mut uow, &builder, "Order", StoreKind::Relational)
        .unwrap();
    let stmt = query.as_sql().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM \"orders\" WHERE \"status\" = ?1 AND NOT (\"customer\" = ?2) \
         ORDER BY \"orderId\""
    );
    assert_eq!(stmt.params, vec![Value::from("open"), Value::from("acme")]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn search_statement_matches_reparsed_builder(steps in order_query_strategy()) {
        let env = TestEnvironment::memory();
        let builder = build_query(steps);
        let predicate = builder.build().unwrap();

        let mut uow = env.unit_of_work("tester");
        let searched = {
            let mut results = env
                .manager()
                .search(&mut uow, &predicate, "Order", StoreKind::Relational)
                .unwrap();
            prop_assert_eq!(results.by_ref().filter(Result::is_err).count(), 0);
            results.statement().to_string()
        };
        let parsed = env
            .manager()
            .parse(&mut uow, &builder, "Order", StoreKind::Relational)
            .unwrap();
        prop_assert_eq!(searched, parsed.to_string());
    }
}

fn shipping_with_override(batch_size: usize) -> Environment {
    let options = ShipmentOptions {
        customer_query: Some(r#"SELECT * FROM "customers" WHERE "id" = ?1"#.to_string()),
        ..ShipmentOptions::default()
    };
    let env = Environment::open_with(
        shipment_config().search_batch_size(batch_size),
        shipment_schema(&options),
        Arc::new(MemoryAuditSink::new()),
    )
    .unwrap();

    let mut uow = env.unit_of_work("seeder");
    for id in 1..=3 {
        let mut created = shipment(id, "standard")
            .with_one("customer", customer(10 + id, &format!("c{id}")));
        env.manager()
            .create(&mut uow, &mut created, StoreKind::Relational)
            .unwrap();
    }
    env.manager().commit_all(&mut uow, "Shipment").unwrap();
    env
}

fn search_shipments(env: &Environment) -> (Vec<Entity>, u64) {
    let store = env.registry().resolve_by_name(SHIPPING_DB).unwrap();
    let before = store.stats().queries;
    let mut uow = env.unit_of_work("tester");
    let found: Vec<Entity> = env
        .manager()
        .search(&mut uow, &QueryBuilder::new().build().unwrap(), "Shipment", StoreKind::Relational)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    (found, store.stats().queries - before)
}

#[test]
fn override_queries_run_once_per_page() {
    let env = shipping_with_override(10);
    let (found, queries) = search_shipments(&env);

    assert_eq!(ids(&found, "shipmentId"), [1, 2, 3]);
    let names: Vec<_> = found
        .iter()
        .map(|s| s.one("customer").and_then(|c| c.get("name")).cloned())
        .collect();
    assert_eq!(
        names,
        [Some(Value::from("c1")), Some(Value::from("c2")), Some(Value::from("c3"))]
    );
    // The page itself, then one customer lookup.
    assert_eq!(queries, 2);
}

#[test]
fn override_queries_are_chunked_by_batch_size() {
    let env = shipping_with_override(2);
    let (found, queries) = search_shipments(&env);

    assert_eq!(ids(&found, "shipmentId"), [1, 2, 3]);
    assert!(found.iter().all(|s| s.one("customer").is_some()));
    assert_eq!(queries, 4);
}
