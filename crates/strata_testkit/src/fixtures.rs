//! Test fixtures.
//!
//! Orders live in a relational store, their items in a search index:
//! - `Order` (`orders`): key `orderId`, required `customer`, `status`,
//!   active flag `active`, and `items`, a many-to-many reference to `Item`
//!   joined on `orderId`
//! - `Item` (`items`): key `orderId, productId`, required `quantity`,
//!   `sku` indexed with the standard analyzer
//!
//! Shipments exercise single-target references, all in one relational
//! store:
//! - `Customer` (`customers`): key `id`, required `name`
//! - `Address` (`addresses`): key `addressId`, required `street`
//! - `Shipment` (`shipments`): key `shipmentId`, `note`, and two foreign
//!   keys: `customerId` for `customer` (many-to-one, joined on `id`) and
//!   `addressId` for `address` (one-to-one, owning)

use std::ops::Deref;
use std::sync::Arc;
use strata_core::{
    Cardinality, Entity, EntityDescriptor, Environment, EnvironmentConfig, MemoryAuditSink,
    Operation, ReferenceDecl, Schema,
};
use strata_storage::{Analyzer, ConnectionConfig, StoreKind};
use tempfile::TempDir;
use uuid::Uuid;

/// Name of the relational store.
pub const ORDERS_DB: &str = "orders-db";
/// Name of the search index store.
pub const ITEMS_SEARCH: &str = "items-search";

/// How `Order.items` propagates writes.
#[derive(Debug, Clone)]
pub struct ItemsCascade {
    /// Operations cascaded to bound items.
    pub operations: Vec<Operation>,
    /// Whether items no longer bound are deleted.
    pub orphan_removal: bool,
}

impl Default for ItemsCascade {
    fn default() -> Self {
        Self {
            operations: vec![Operation::Create, Operation::Update],
            orphan_removal: false,
        }
    }
}

impl ItemsCascade {
    /// Cascades every operation and removes orphans.
    #[must_use]
    pub fn owning() -> Self {
        Self {
            operations: vec![Operation::Create, Operation::Update, Operation::Delete],
            orphan_removal: true,
        }
    }
}

/// The `Order` descriptor.
#[must_use]
pub fn order_descriptor(cascade: &ItemsCascade) -> EntityDescriptor {
    EntityDescriptor::new("Order")
        .collection("orders")
        .key(["orderId"])
        .required("customer")
        .field("status")
        .active_flag("active")
        .reference(
            "items",
            ReferenceDecl::new("Item", Cardinality::ManyToMany)
                .join("orderId", "orderId")
                .cascade(cascade.operations.iter().copied())
                .orphan_removal(cascade.orphan_removal),
        )
}

/// The `Item` descriptor.
#[must_use]
pub fn item_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("Item")
        .collection("items")
        .key(["orderId", "productId"])
        .required("quantity")
        .indexed("sku", Analyzer::Standard)
}

/// Schema holding both types.
///
/// # Panics
///
/// Never; both descriptors are distinct.
#[must_use]
pub fn order_schema(cascade: &ItemsCascade) -> Schema {
    Schema::new()
        .with(order_descriptor(cascade))
        .and_then(|s| s.with(item_descriptor()))
        .expect("fixture schema is consistent")
}

/// Configuration with fresh, uniquely named stores.
#[must_use]
pub fn order_config() -> EnvironmentConfig {
    order_config_at(ConnectionConfig::new(format!("memory:orders-{}", Uuid::new_v4())))
}

/// Configuration whose relational store uses `orders`.
#[must_use]
pub fn order_config_at(orders: ConnectionConfig) -> EnvironmentConfig {
    EnvironmentConfig::new()
        .store(ORDERS_DB, StoreKind::Relational, orders)
        .store(
            ITEMS_SEARCH,
            StoreKind::SearchIndex,
            ConnectionConfig::new(format!("items-{}", Uuid::new_v4())),
        )
        .map("Order", [StoreKind::Relational])
        .map("Item", [StoreKind::SearchIndex])
}

/// A new order.
#[must_use]
pub fn order(order_id: i64, customer: &str, items: Vec<Entity>) -> Entity {
    Entity::new("Order")
        .with("orderId", order_id)
        .with("customer", customer)
        .with("status", "open")
        .with("active", true)
        .with_many("items", items)
}

/// A new item; its `orderId` is filled in by the cascade.
#[must_use]
pub fn item(product_id: i64, quantity: i64) -> Entity {
    Entity::new("Item")
        .with("productId", product_id)
        .with("quantity", quantity)
        .with("sku", format!("SKU{product_id} widget"))
}

/// Name of the shipping store.
pub const SHIPPING_DB: &str = "shipping-db";

/// How `Shipment.customer` is declared.
#[derive(Debug, Clone)]
pub struct ShipmentOptions {
    /// Operations cascaded to the bound customer.
    pub customer_cascade: Vec<Operation>,
    /// Native query used instead of the join to look customers up.
    pub customer_query: Option<String>,
}

impl Default for ShipmentOptions {
    fn default() -> Self {
        Self {
            customer_cascade: vec![Operation::Create, Operation::Update],
            customer_query: None,
        }
    }
}

/// The `Customer` descriptor.
#[must_use]
pub fn customer_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("Customer")
        .collection("customers")
        .key(["id"])
        .required("name")
}

/// The `Address` descriptor.
#[must_use]
pub fn address_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("Address")
        .collection("addresses")
        .key(["addressId"])
        .required("street")
}

/// The `Shipment` descriptor.
#[must_use]
pub fn shipment_descriptor(options: &ShipmentOptions) -> EntityDescriptor {
    let mut customer = ReferenceDecl::new("Customer", Cardinality::ManyToOne)
        .join("customerId", "id")
        .cascade(options.customer_cascade.iter().copied());
    if let Some(sql) = &options.customer_query {
        customer = customer.query(sql.clone());
    }
    EntityDescriptor::new("Shipment")
        .collection("shipments")
        .key(["shipmentId"])
        .field("note")
        .field("customerId")
        .field("addressId")
        .reference("customer", customer)
        .reference(
            "address",
            ReferenceDecl::new("Address", Cardinality::OneToOne)
                .join("addressId", "addressId")
                .cascade([Operation::Create, Operation::Update, Operation::Delete])
                .orphan_removal(true),
        )
}

/// Schema holding the shipping types.
///
/// # Panics
///
/// Never; the descriptors are distinct.
#[must_use]
pub fn shipment_schema(options: &ShipmentOptions) -> Schema {
    Schema::new()
        .with(customer_descriptor())
        .and_then(|s| s.with(address_descriptor()))
        .and_then(|s| s.with(shipment_descriptor(options)))
        .expect("fixture schema is consistent")
}

/// Configuration with a fresh, uniquely named shipping store.
#[must_use]
pub fn shipment_config() -> EnvironmentConfig {
    EnvironmentConfig::new()
        .store(
            SHIPPING_DB,
            StoreKind::Relational,
            ConnectionConfig::new(format!("memory:shipping-{}", Uuid::new_v4())),
        )
        .map("Customer", [StoreKind::Relational])
        .map("Address", [StoreKind::Relational])
        .map("Shipment", [StoreKind::Relational])
}

/// A new customer.
#[must_use]
pub fn customer(id: i64, name: &str) -> Entity {
    Entity::new("Customer").with("id", id).with("name", name)
}

/// A new address.
#[must_use]
pub fn address(address_id: i64, street: &str) -> Entity {
    Entity::new("Address")
        .with("addressId", address_id)
        .with("street", street)
}

/// A new shipment with no references bound.
#[must_use]
pub fn shipment(shipment_id: i64, note: &str) -> Entity {
    Entity::new("Shipment")
        .with("shipmentId", shipment_id)
        .with("note", note)
}

/// An open fixture environment with an in-memory audit sink.
pub struct TestEnvironment {
    /// The environment.
    pub env: Environment,
    /// Every audit record emitted so far.
    pub audit: Arc<MemoryAuditSink>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEnvironment {
    /// Opens the fixture on in-memory stores with the default cascade.
    pub fn memory() -> Self {
        Self::with_cascade(&ItemsCascade::default())
    }

    /// Opens the fixture on in-memory stores.
    pub fn with_cascade(cascade: &ItemsCascade) -> Self {
        Self::open(order_config(), order_schema(cascade), None)
    }

    /// Opens the shipping fixture on an in-memory store.
    pub fn shipping(options: &ShipmentOptions) -> Self {
        Self::open(shipment_config(), shipment_schema(options), None)
    }

    /// Opens the fixture with the relational store in a temporary file.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("orders.db");
        let config = order_config_at(ConnectionConfig::new(path.to_string_lossy()));
        Self::open(config, order_schema(&ItemsCascade::default()), Some(temp_dir))
    }

    fn open(config: EnvironmentConfig, schema: Schema, temp_dir: Option<TempDir>) -> Self {
        crate::init_tracing();
        let audit = Arc::new(MemoryAuditSink::new());
        let env = Environment::open_with(config, schema, audit.clone())
            .expect("Failed to open fixture environment");
        Self {
            env,
            audit,
            _temp_dir: temp_dir,
        }
    }

    /// Native queries issued so far against a store.
    pub fn queries(&self, store: &str) -> u64 {
        self.env
            .registry()
            .resolve_by_name(store)
            .map(|s| s.stats().queries)
            .unwrap_or(0)
    }
}

impl Deref for TestEnvironment {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}
