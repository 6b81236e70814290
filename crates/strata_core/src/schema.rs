//! The set of entity descriptors known to an environment.

use crate::config::EnvironmentConfig;
use crate::entity::EntityDescriptor;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_storage::StoreKind;

/// Registered entity descriptors, validated once when the environment opens.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    descriptors: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the type is already registered.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> CoreResult<()> {
        let name = descriptor.entity_type().to_string();
        if self.descriptors.contains_key(&name) {
            return Err(CoreError::configuration(format!(
                "entity type {name} registered twice"
            )));
        }
        self.descriptors.insert(name, Arc::new(descriptor));
        Ok(())
    }

    /// Adds a descriptor, builder style.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the type is already registered.
    pub fn with(mut self, descriptor: EntityDescriptor) -> CoreResult<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Looks up a descriptor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for undeclared types.
    pub fn descriptor(&self, entity_type: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.descriptors
            .get(entity_type)
            .cloned()
            .ok_or_else(|| CoreError::configuration(format!("unknown entity type {entity_type}")))
    }

    /// All descriptors, ordered by type name.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.descriptors.values()
    }

    /// Checks descriptors against each other and against the store mappings.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency as a configuration error:
    /// - a type without key fields or without eligible store kinds
    /// - a soft-delete flag that is not a value field
    /// - a reference to an undeclared type, with no join columns, or with
    ///   a join column missing on either side
    /// - an override query on a reference whose target is not relational
    pub fn validate(&self, config: &EnvironmentConfig) -> CoreResult<()> {
        for desc in self.descriptors.values() {
            let ty = desc.entity_type();
            if desc.key_fields().is_empty() {
                return Err(CoreError::configuration(format!("{ty} declares no key")));
            }
            if config.eligible_kinds(ty).is_empty() {
                return Err(CoreError::configuration(format!(
                    "{ty} is not mapped to any store kind"
                )));
            }
            if let Some(flag) = desc.active_flag_field() {
                if !desc.is_value_field(flag) {
                    return Err(CoreError::configuration(format!(
                        "{ty}.{flag} is not a value field"
                    )));
                }
            }

            for (field, decl) in desc.references() {
                let target = self.descriptors.get(&decl.target_type).ok_or_else(|| {
                    CoreError::configuration(format!(
                        "{ty}.{field} references undeclared type {}",
                        decl.target_type
                    ))
                })?;
                if decl.join_columns.is_empty() {
                    return Err(CoreError::configuration(format!(
                        "{ty}.{field} declares no join columns"
                    )));
                }
                for (source, target_col) in &decl.join_columns {
                    if !desc.is_value_field(source) {
                        return Err(CoreError::configuration(format!(
                            "{ty}.{field}: join column {source} is not a field of {ty}"
                        )));
                    }
                    if !target.is_value_field(target_col) {
                        return Err(CoreError::configuration(format!(
                            "{ty}.{field}: join column {target_col} is not a field of {}",
                            decl.target_type
                        )));
                    }
                }
                let target_kinds = config.eligible_kinds(&decl.target_type);
                if let Some(kind) = decl.target_kind {
                    if !target_kinds.contains(&kind) {
                        return Err(CoreError::configuration(format!(
                            "{ty}.{field}: {} is not mapped to {kind}",
                            decl.target_type
                        )));
                    }
                }
                let target_kind = decl.target_kind.or_else(|| target_kinds.first().copied());
                if decl.query.is_some() && target_kind != Some(StoreKind::Relational) {
                    return Err(CoreError::configuration(format!(
                        "{ty}.{field}: override queries need a relational target"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ReferenceDecl;
    use crate::types::Cardinality;

    fn order(items: ReferenceDecl) -> EntityDescriptor {
        EntityDescriptor::new("Order")
            .key(["orderId"])
            .reference("items", items)
    }

    fn item() -> EntityDescriptor {
        EntityDescriptor::new("Item").key(["orderId", "productId"])
    }

    fn config() -> EnvironmentConfig {
        EnvironmentConfig::new()
            .map("Order", [StoreKind::Relational])
            .map("Item", [StoreKind::SearchIndex])
    }

    fn schema(items: ReferenceDecl) -> Schema {
        Schema::new().with(order(items)).unwrap().with(item()).unwrap()
    }

    #[test]
    fn valid_schema_passes() {
        let decl = ReferenceDecl::new("Item", Cardinality::ManyToMany).join("orderId", "orderId");
        schema(decl).validate(&config()).unwrap();
    }

    #[test]
    fn duplicate_registration_fails() {
        let err = Schema::new().with(item()).unwrap().with(item()).unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }

    #[test]
    fn join_columns_must_exist_on_both_sides() {
        let missing_target =
            ReferenceDecl::new("Item", Cardinality::OneToMany).join("orderId", "order_ref");
        assert!(schema(missing_target).validate(&config()).is_err());

        let missing_source =
            ReferenceDecl::new("Item", Cardinality::OneToMany).join("nope", "orderId");
        assert!(schema(missing_source).validate(&config()).is_err());

        let none = ReferenceDecl::new("Item", Cardinality::OneToMany);
        assert!(schema(none).validate(&config()).is_err());
    }

    #[test]
    fn undeclared_target_fails() {
        let decl = ReferenceDecl::new("Ghost", Cardinality::OneToOne).join("orderId", "id");
        let schema = Schema::new().with(order(decl)).unwrap();
        let err = schema
            .validate(&config().map("Ghost", [StoreKind::Relational]))
            .unwrap_err();
        assert!(err.to_string().contains("undeclared type Ghost"));
    }

    #[test]
    fn override_query_needs_relational_target() {
        let decl = ReferenceDecl::new("Item", Cardinality::OneToMany)
            .join("orderId", "orderId")
            .query("SELECT * FROM items WHERE orderId = ?1");
        assert!(schema(decl).validate(&config()).is_err());
    }

    #[test]
    fn unmapped_type_fails() {
        let decl = ReferenceDecl::new("Item", Cardinality::OneToMany).join("orderId", "orderId");
        let config = EnvironmentConfig::new().map("Order", [StoreKind::Relational]);
        assert!(schema(decl).validate(&config).is_err());
    }
}
