//! Mapping descriptors: the compile-time table describing how an entity
//! type maps onto stores.
//!
//! A descriptor lists every field with its semantic role (plain value,
//! reference, ignored) and is built once, when the schema is assembled.
//! Nothing inspects entity values to discover their shape at runtime.

use super::record::Entity;
use crate::error::{CoreError, CoreResult, Violation};
use crate::types::{Cardinality, Operation};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use strata_codec::{Row, Value};
use strata_storage::{Analyzer, CollectionLayout, FieldLayout, RowKey, StoreKind};

/// Declares a reference from a source field to a target entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDecl {
    /// Target entity type.
    pub target_type: String,
    /// `(source field, target field)` pairs.
    pub join_columns: Vec<(String, String)>,
    /// Single entity or collection.
    pub cardinality: Cardinality,
    /// Operations propagated to bound targets.
    pub cascade: BTreeSet<Operation>,
    /// Delete stored targets no longer bound to the source.
    pub orphan_removal: bool,
    /// SQL run instead of the generated lookup, with `?1..?n` bound to
    /// the source join values. Relational targets only.
    pub query: Option<String>,
    /// Store kind hosting the target; the target's first eligible kind
    /// when unset.
    pub target_kind: Option<StoreKind>,
}

impl ReferenceDecl {
    /// Declares a reference to `target_type`.
    pub fn new(target_type: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            target_type: target_type.into(),
            join_columns: Vec::new(),
            cardinality,
            cascade: BTreeSet::new(),
            orphan_removal: false,
            query: None,
            target_kind: None,
        }
    }

    /// Adds a join column pair.
    #[must_use]
    pub fn join(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.join_columns.push((source.into(), target.into()));
        self
    }

    /// Adds operations to the cascade set.
    #[must_use]
    pub fn cascade(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.cascade.extend(ops);
        self
    }

    /// Sets orphan removal.
    #[must_use]
    pub fn orphan_removal(mut self, enabled: bool) -> Self {
        self.orphan_removal = enabled;
        self
    }

    /// Sets the override query.
    #[must_use]
    pub fn query(mut self, sql: impl Into<String>) -> Self {
        self.query = Some(sql.into());
        self
    }

    /// Pins the target to a store kind.
    #[must_use]
    pub fn in_kind(mut self, kind: StoreKind) -> Self {
        self.target_kind = Some(kind);
        self
    }

    /// Returns true when `op` cascades to targets.
    #[must_use]
    pub fn cascades(&self, op: Operation) -> bool {
        self.cascade.contains(&op)
    }

    /// The source side of the join.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.join_columns.iter().map(|(s, _)| s.as_str())
    }

    /// The target side of the join.
    pub fn target_columns(&self) -> impl Iterator<Item = &str> {
        self.join_columns.iter().map(|(_, t)| t.as_str())
    }
}

/// Search index settings of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    /// Analyzer applied to text values.
    pub analyzer: Analyzer,
}

/// The semantic role of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRole {
    /// Stored as-is.
    Value {
        /// Must be present and non-null to persist.
        required: bool,
        /// Index settings, consumed by search index stores only.
        index: Option<IndexSettings>,
    },
    /// Resolved and cascaded through another entity type.
    Reference(ReferenceDecl),
    /// Carried in memory, never stored.
    Ignore,
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Field role.
    pub role: FieldRole,
}

/// Entity-level validation hook.
pub type Validator = Arc<dyn Fn(&Entity) -> Vec<Violation> + Send + Sync>;

/// Describes how one entity type is stored.
#[derive(Clone)]
pub struct EntityDescriptor {
    entity_type: String,
    collection: String,
    key_fields: Vec<String>,
    fields: Vec<FieldDescriptor>,
    active_flag: Option<String>,
    validator: Option<Validator>,
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("entity_type", &self.entity_type)
            .field("collection", &self.collection)
            .field("key_fields", &self.key_fields)
            .field("fields", &self.fields)
            .field("active_flag", &self.active_flag)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl EntityDescriptor {
    /// Starts a descriptor. The collection defaults to the type name.
    pub fn new(entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            collection: entity_type.clone(),
            entity_type,
            key_fields: Vec::new(),
            fields: Vec::new(),
            active_flag: None,
            validator: None,
        }
    }

    /// Sets the collection (table, key namespace, index) name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = name.into();
        self
    }

    /// Declares the key fields, in key order. Each becomes a required value field.
    #[must_use]
    pub fn key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        for name in fields {
            let name = name.into();
            self = self.push(name.clone(), FieldRole::Value {
                required: true,
                index: None,
            });
            self.key_fields.push(name);
        }
        self
    }

    /// Declares an optional value field.
    #[must_use]
    pub fn field(self, name: impl Into<String>) -> Self {
        self.push(name.into(), FieldRole::Value {
            required: false,
            index: None,
        })
    }

    /// Declares a required value field.
    #[must_use]
    pub fn required(self, name: impl Into<String>) -> Self {
        self.push(name.into(), FieldRole::Value {
            required: true,
            index: None,
        })
    }

    /// Declares a value field with search index settings.
    #[must_use]
    pub fn indexed(self, name: impl Into<String>, analyzer: Analyzer) -> Self {
        self.push(name.into(), FieldRole::Value {
            required: false,
            index: Some(IndexSettings { analyzer }),
        })
    }

    /// Declares a reference field.
    #[must_use]
    pub fn reference(self, name: impl Into<String>, decl: ReferenceDecl) -> Self {
        self.push(name.into(), FieldRole::Reference(decl))
    }

    /// Declares a field that is never stored.
    #[must_use]
    pub fn ignore(self, name: impl Into<String>) -> Self {
        self.push(name.into(), FieldRole::Ignore)
    }

    /// Declares the boolean field used for soft deletes.
    #[must_use]
    pub fn active_flag(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self = self.push(name.clone(), FieldRole::Value {
            required: false,
            index: None,
        });
        self.active_flag = Some(name);
        self
    }

    /// Installs an entity-level validator.
    #[must_use]
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Entity) -> Vec<Violation> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    fn push(mut self, name: String, role: FieldRole) -> Self {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.role = role,
            None => self.fields.push(FieldDescriptor { name, role }),
        }
        self
    }

    /// The entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The collection name.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Key fields, in key order.
    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// All declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The soft-delete flag field.
    #[must_use]
    pub fn active_flag_field(&self) -> Option<&str> {
        self.active_flag.as_deref()
    }

    pub(crate) fn custom_validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    /// Looks up a field.
    #[must_use]
    pub fn field_descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true for a stored value field.
    #[must_use]
    pub fn is_value_field(&self, name: &str) -> bool {
        matches!(
            self.field_descriptor(name).map(|f| &f.role),
            Some(FieldRole::Value { .. })
        )
    }

    /// Stored value fields, in declaration order.
    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::Value { .. }))
    }

    /// Reference fields, in declaration order.
    pub fn references(&self) -> impl Iterator<Item = (&str, &ReferenceDecl)> {
        self.fields.iter().filter_map(|f| match &f.role {
            FieldRole::Reference(decl) => Some((f.name.as_str(), decl)),
            _ => None,
        })
    }

    /// Looks up a reference field.
    #[must_use]
    pub fn reference_decl(&self, name: &str) -> Option<&ReferenceDecl> {
        match self.field_descriptor(name).map(|f| &f.role) {
            Some(FieldRole::Reference(decl)) => Some(decl),
            _ => None,
        }
    }

    /// Returns true when this type's rows carry `decl` as a foreign key: a
    /// single-target reference joined on columns other than the key.
    ///
    /// The target of such a reference is written before the source, and
    /// join values flow from the target onto the source.
    #[must_use]
    pub fn holds_foreign_key(&self, decl: &ReferenceDecl) -> bool {
        !decl.cardinality.is_collection()
            && decl
                .source_columns()
                .any(|c| !self.key_fields.iter().any(|k| k == c))
    }

    /// The physical layout of this type's collection on a store kind.
    ///
    /// Analyzers are only carried for search indices.
    #[must_use]
    pub fn layout(&self, kind: StoreKind) -> CollectionLayout {
        let fields = self
            .value_fields()
            .map(|f| FieldLayout {
                name: f.name.clone(),
                analyzer: match (&f.role, kind) {
                    (FieldRole::Value { index: Some(settings), .. }, StoreKind::SearchIndex) => {
                        Some(settings.analyzer)
                    }
                    _ => None,
                },
            })
            .collect();
        CollectionLayout {
            name: self.collection.clone(),
            key_fields: self.key_fields.clone(),
            fields,
        }
    }

    /// Extracts the key of an entity.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming every missing or null key field.
    pub fn key_of(&self, entity: &Entity) -> CoreResult<RowKey> {
        let mut key = Vec::with_capacity(self.key_fields.len());
        let mut violations = Vec::new();
        for field in &self.key_fields {
            match entity.get(field) {
                Some(value) if !value.is_null() => key.push((field.clone(), value.clone())),
                _ => violations.push(Violation::new(field.clone(), "key field is missing")),
            }
        }
        if violations.is_empty() {
            Ok(key)
        } else {
            Err(CoreError::Validation {
                entity_type: self.entity_type.clone(),
                key: "?".into(),
                violations,
            })
        }
    }

    /// Builds a key from values given in key order.
    ///
    /// # Errors
    ///
    /// Returns an invalid query error when the arity is wrong.
    pub fn key_from_values(&self, values: &[Value]) -> CoreResult<RowKey> {
        if values.len() != self.key_fields.len() {
            return Err(CoreError::invalid_query(format!(
                "{} has {} key fields, got {} values",
                self.entity_type,
                self.key_fields.len(),
                values.len()
            )));
        }
        Ok(self
            .key_fields
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect())
    }

    /// The row stored for an entity: every value field, null when unset.
    #[must_use]
    pub fn to_row(&self, entity: &Entity) -> Row {
        self.value_fields()
            .map(|f| {
                let value = entity.get(&f.name).cloned().unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect()
    }

    /// Rebuilds an entity from a stored row.
    ///
    /// Columns the descriptor does not declare are dropped. A false
    /// active flag yields an `InActive` entity.
    #[must_use]
    pub fn from_row(&self, row: Row) -> Entity {
        let fields: Row = row
            .into_iter()
            .filter(|(name, _)| self.is_value_field(name))
            .collect();
        let mut entity = Entity::from_row(self.entity_type.clone(), fields);
        if let Some(flag) = &self.active_flag {
            if entity.get(flag).and_then(Value::as_bool) == Some(false) {
                entity.set_state(super::state::EntityState::InActive);
            }
        }
        entity
    }

    /// Values of `columns` on `entity`, or `None` if any is missing or null.
    #[must_use]
    pub fn tuple<'a>(entity: &Entity, columns: impl IntoIterator<Item = &'a str>) -> Option<Vec<Value>> {
        columns
            .into_iter()
            .map(|c| entity.get(c).filter(|v| !v.is_null()).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;

    fn item() -> EntityDescriptor {
        EntityDescriptor::new("Item")
            .collection("items")
            .key(["orderId", "productId"])
            .required("quantity")
            .indexed("title", Analyzer::Standard)
            .ignore("cached")
            .active_flag("active")
    }

    #[test]
    fn key_fields_become_required_values() {
        let desc = item();
        assert_eq!(desc.key_fields(), ["orderId", "productId"]);
        assert!(matches!(
            desc.field_descriptor("orderId").map(|f| &f.role),
            Some(FieldRole::Value { required: true, .. })
        ));
        assert!(!desc.is_value_field("cached"));
    }

    #[test]
    fn layout_carries_analyzers_for_search_only() {
        let desc = item();
        let search = desc.layout(StoreKind::SearchIndex);
        assert_eq!(search.analyzer("title"), Some(Analyzer::Standard));
        let sql = desc.layout(StoreKind::Relational);
        assert_eq!(sql.analyzer("title"), None);
        assert_eq!(sql.name, "items");
        assert!(sql.fields.iter().all(|f| f.name != "cached"));
    }

    #[test]
    fn key_of_reports_every_missing_field() {
        let desc = item();
        let err = desc.key_of(&Entity::new("Item")).unwrap_err();
        assert_eq!(err.violations().len(), 2);

        let entity = Entity::new("Item").with("orderId", 1).with("productId", 2);
        assert_eq!(
            desc.key_of(&entity).unwrap(),
            vec![
                ("orderId".to_string(), Value::Integer(1)),
                ("productId".to_string(), Value::Integer(2)),
            ]
        );
    }

    #[test]
    fn foreign_keys_are_single_target_joins_off_the_key() {
        let order = EntityDescriptor::new("Order")
            .key(["orderId"])
            .field("customerId");
        let customer = ReferenceDecl::new("Customer", Cardinality::ManyToOne).join("customerId", "id");
        let invoice = ReferenceDecl::new("Invoice", Cardinality::OneToOne).join("orderId", "orderId");
        let items = ReferenceDecl::new("Item", Cardinality::OneToMany).join("customerId", "orderId");

        assert!(order.holds_foreign_key(&customer));
        assert!(!order.holds_foreign_key(&invoice));
        assert!(!order.holds_foreign_key(&items));
    }

    #[test]
    fn rows_hold_every_value_field() {
        let desc = item();
        let entity = Entity::new("Item")
            .with("orderId", 1)
            .with("productId", 2)
            .with("cached", "skip me");
        let row = desc.to_row(&entity);
        assert_eq!(row.get("quantity"), Some(&Value::Null));
        assert!(!row.contains_key("cached"));
    }

    #[test]
    fn false_active_flag_restores_inactive() {
        let desc = item();
        let mut row = Row::new();
        row.insert("orderId".into(), Value::Integer(1));
        row.insert("active".into(), Value::Integer(0));
        row.insert("unknown".into(), Value::Integer(9));
        let entity = desc.from_row(row);
        assert_eq!(entity.state(), &EntityState::InActive);
        assert!(entity.get("unknown").is_none());
    }

    #[test]
    fn reference_builder() {
        let decl = ReferenceDecl::new("Item", Cardinality::OneToMany)
            .join("orderId", "orderId")
            .cascade([Operation::Create, Operation::Delete])
            .orphan_removal(true);
        assert!(decl.cascades(Operation::Delete));
        assert!(!decl.cascades(Operation::Update));
        assert_eq!(decl.source_columns().collect::<Vec<_>>(), vec!["orderId"]);
    }

    #[test]
    fn tuples_skip_null_joins() {
        let entity = Entity::new("Order").with("orderId", 3).with("region", ());
        assert_eq!(
            EntityDescriptor::tuple(&entity, ["orderId"]),
            Some(vec![Value::Integer(3)])
        );
        assert_eq!(EntityDescriptor::tuple(&entity, ["orderId", "region"]), None);
    }
}
