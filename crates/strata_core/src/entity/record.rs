//! The dynamic entity record.

use super::state::EntityState;
use std::collections::BTreeMap;
use strata_codec::{Row, Value};

/// The resolved value of a reference field.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Single-valued reference (one-to-one, many-to-one).
    One(Option<Box<Entity>>),
    /// Collection reference (one-to-many, many-to-many), in result order.
    Many(Vec<Entity>),
}

impl Binding {
    /// Iterates over the bound entities.
    pub fn entities(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        match self {
            Binding::One(target) => Box::new(target.iter().map(|b| &**b)),
            Binding::Many(targets) => Box::new(targets.iter()),
        }
    }

    /// Iterates mutably over the bound entities.
    pub fn entities_mut(&mut self) -> Box<dyn Iterator<Item = &mut Entity> + '_> {
        match self {
            Binding::One(target) => Box::new(target.iter_mut().map(|b| &mut **b)),
            Binding::Many(targets) => Box::new(targets.iter_mut()),
        }
    }

    /// Number of bound entities.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Binding::One(target) => usize::from(target.is_some()),
            Binding::Many(targets) => targets.len(),
        }
    }

    /// Returns true when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entity instance.
///
/// Fields hold plain values; reference fields hold [`Binding`]s. A
/// reference field that was never loaded or assigned is absent from
/// [`Entity::references`], which is different from an empty binding.
/// The state is advanced by the entity manager only.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_type: String,
    state: EntityState,
    fields: Row,
    references: BTreeMap<String, Binding>,
}

impl Entity {
    /// Creates a new, unsaved entity of the given type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            state: EntityState::New,
            fields: Row::new(),
            references: BTreeMap::new(),
        }
    }

    /// Restores an entity whose state was tracked elsewhere, e.g. after
    /// deserialization by a collaborator.
    #[must_use]
    pub fn with_state(mut self, state: EntityState) -> Self {
        self.state = state;
        self
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Binds a collection reference, builder style.
    #[must_use]
    pub fn with_many(mut self, field: impl Into<String>, targets: Vec<Entity>) -> Self {
        self.bind_many(field, targets);
        self
    }

    /// Binds a single reference, builder style.
    #[must_use]
    pub fn with_one(mut self, field: impl Into<String>, target: Entity) -> Self {
        self.bind_one(field, Some(target));
        self
    }

    /// The entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The lifecycle state.
    #[must_use]
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Removes a field value.
    pub fn clear(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// All field values.
    #[must_use]
    pub fn fields(&self) -> &Row {
        &self.fields
    }

    /// Returns a reference binding, if loaded or assigned.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<&Binding> {
        self.references.get(field)
    }

    /// Returns a mutable reference binding.
    pub fn reference_mut(&mut self, field: &str) -> Option<&mut Binding> {
        self.references.get_mut(field)
    }

    /// All loaded reference bindings.
    #[must_use]
    pub fn references(&self) -> &BTreeMap<String, Binding> {
        &self.references
    }

    /// Returns the entities bound to a collection reference.
    #[must_use]
    pub fn many(&self, field: &str) -> &[Entity] {
        match self.references.get(field) {
            Some(Binding::Many(targets)) => targets,
            _ => &[],
        }
    }

    /// Returns the entity bound to a single reference.
    #[must_use]
    pub fn one(&self, field: &str) -> Option<&Entity> {
        match self.references.get(field) {
            Some(Binding::One(target)) => target.as_deref(),
            _ => None,
        }
    }

    /// Binds a collection reference.
    pub fn bind_many(&mut self, field: impl Into<String>, targets: Vec<Entity>) {
        self.references.insert(field.into(), Binding::Many(targets));
    }

    /// Binds a single reference.
    pub fn bind_one(&mut self, field: impl Into<String>, target: Option<Entity>) {
        self.references
            .insert(field.into(), Binding::One(target.map(Box::new)));
    }

    pub(crate) fn bind(&mut self, field: impl Into<String>, binding: Binding) {
        self.references.insert(field.into(), binding);
    }

    /// Forgets a reference binding, so it counts as not loaded.
    pub fn unbind(&mut self, field: &str) -> Option<Binding> {
        self.references.remove(field)
    }

    /// Builds a synced entity from a stored row.
    pub(crate) fn from_row(entity_type: impl Into<String>, fields: Row) -> Self {
        Self {
            entity_type: entity_type.into(),
            state: EntityState::Synced,
            fields,
            references: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product: i64) -> Entity {
        Entity::new("Item").with("productId", product)
    }

    #[test]
    fn new_entities_start_new() {
        let order = Entity::new("Order").with("orderId", 1);
        assert_eq!(order.state(), &EntityState::New);
        assert_eq!(order.get("orderId"), Some(&Value::Integer(1)));
    }

    #[test]
    fn unloaded_reference_differs_from_empty() {
        let mut order = Entity::new("Order");
        assert!(order.reference("items").is_none());
        order.bind_many("items", Vec::new());
        assert!(order.reference("items").is_some_and(Binding::is_empty));
        order.unbind("items");
        assert!(order.reference("items").is_none());
    }

    #[test]
    fn bindings_iterate_targets() {
        let order = Entity::new("Order").with_many("items", vec![item(1), item(2)]);
        let ids: Vec<_> = order
            .reference("items")
            .unwrap()
            .entities()
            .map(|e| e.get("productId").cloned())
            .collect();
        assert_eq!(ids, vec![Some(Value::Integer(1)), Some(Value::Integer(2))]);
        assert_eq!(order.many("items").len(), 2);

        let mut single = Entity::new("Item").with_one("order", Entity::new("Order"));
        assert_eq!(single.reference("order").map(Binding::len), Some(1));
        for target in single.reference_mut("order").unwrap().entities_mut() {
            target.set("orderId", 7);
        }
        assert_eq!(
            single.one("order").and_then(|o| o.get("orderId")),
            Some(&Value::Integer(7))
        );
    }
}
