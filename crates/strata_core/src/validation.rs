//! Pre-persistence validation.

use crate::entity::{Entity, EntityDescriptor, FieldRole};
use crate::error::{CoreError, CoreResult, Violation};
use crate::types::Operation;
use strata_storage::format_key;

/// Checks an entity before `op` touches a store.
///
/// Every problem is collected into one validation error: a state that
/// does not admit `op`, a type mismatch, missing key fields, and for
/// creates and updates missing required fields and the descriptor's own
/// validator.
pub(crate) fn validate(
    descriptor: &EntityDescriptor,
    entity: &Entity,
    op: Operation,
) -> CoreResult<()> {
    let mut violations = Vec::new();

    if let Err(reason) = entity.state().check(op) {
        violations.push(Violation::new("state", reason));
    }
    if entity.entity_type() != descriptor.entity_type() {
        violations.push(Violation::new(
            "type",
            format!(
                "expected {}, got {}",
                descriptor.entity_type(),
                entity.entity_type()
            ),
        ));
    }

    let key = descriptor.key_of(entity);
    if let Err(e) = &key {
        violations.extend(e.violations().iter().cloned());
    }

    if op != Operation::Delete {
        for field in descriptor.value_fields() {
            let required = matches!(field.role, FieldRole::Value { required: true, .. });
            let is_key = descriptor.key_fields().contains(&field.name);
            if required && !is_key && entity.get(&field.name).map_or(true, |v| v.is_null()) {
                violations.push(Violation::new(field.name.clone(), "is required"));
            }
        }
        if let Some(validator) = descriptor.custom_validator() {
            violations.extend(validator(entity));
        }
    }

    if violations.is_empty() {
        return Ok(());
    }
    Err(CoreError::Validation {
        entity_type: descriptor.entity_type().to_string(),
        key: key.map_or_else(|_| "?".to_string(), |k| format_key(&k)),
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use strata_codec::Value;

    fn order() -> EntityDescriptor {
        EntityDescriptor::new("Order")
            .key(["orderId"])
            .required("customer")
            .field("status")
            .validator(|e| match e.get("status").and_then(Value::as_text) {
                Some("open" | "closed") | None => Vec::new(),
                Some(other) => vec![Violation::new("status", format!("unknown status {other}"))],
            })
    }

    #[test]
    fn valid_entity_passes() {
        let entity = Entity::new("Order").with("orderId", 1).with("customer", "acme");
        validate(&order(), &entity, Operation::Create).unwrap();
    }

    #[test]
    fn unknown_state_is_rejected() {
        let entity = Entity::new("Order")
            .with("orderId", 1)
            .with("customer", "acme")
            .with_state(EntityState::Unknown);
        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            let err = validate(&order(), &entity, op).unwrap_err();
            assert!(err.is_validation());
            assert_eq!(err.violations()[0].field, "state");
        }
    }

    #[test]
    fn violations_are_aggregated() {
        let entity = Entity::new("Order").with("status", "lost");
        let err = validate(&order(), &entity, Operation::Create).unwrap_err();
        let fields: Vec<_> = err.violations().iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, ["orderId", "customer", "status"]);
        assert!(err.to_string().contains("Order ?"));
    }

    #[test]
    fn delete_only_needs_the_key() {
        let entity = Entity::new("Order")
            .with("orderId", 1)
            .with_state(EntityState::Synced);
        validate(&order(), &entity, Operation::Delete).unwrap();
    }

    #[test]
    fn type_mismatch_is_reported() {
        let entity = Entity::new("Item").with("orderId", 1).with("customer", "acme");
        let err = validate(&order(), &entity, Operation::Create).unwrap_err();
        assert_eq!(err.violations()[0].field, "type");
    }
}
