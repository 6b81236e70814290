//! Typed entity mapping.

use super::descriptor::EntityDescriptor;
use super::record::Entity;
use crate::error::CoreResult;

/// Maps a Rust type to and from the dynamic [`Entity`] record.
///
/// Implementors must provide:
/// - `descriptor()`: the mapping descriptor registered in the schema
/// - `to_entity()`: field values and reference bindings
/// - `from_entity()`: the inverse, for entities read back from stores
///
/// # Example
///
/// ```rust
/// use strata_core::{CoreResult, CoreError, Entity, EntityDescriptor, EntityMapping};
/// use strata_codec::Value;
///
/// struct Customer {
///     id: i64,
///     name: String,
/// }
///
/// impl EntityMapping for Customer {
///     const ENTITY_TYPE: &'static str = "Customer";
///
///     fn descriptor() -> EntityDescriptor {
///         EntityDescriptor::new(Self::ENTITY_TYPE)
///             .collection("customers")
///             .key(["id"])
///             .required("name")
///     }
///
///     fn to_entity(&self) -> Entity {
///         Entity::new(Self::ENTITY_TYPE)
///             .with("id", self.id)
///             .with("name", self.name.as_str())
///     }
///
///     fn from_entity(entity: &Entity) -> CoreResult<Self> {
///         let id = entity.get("id").and_then(Value::as_integer);
///         let name = entity.get("name").and_then(Value::as_text);
///         match (id, name) {
///             (Some(id), Some(name)) => Ok(Customer { id, name: name.to_string() }),
///             _ => Err(CoreError::configuration("malformed customer row")),
///         }
///     }
/// }
///
/// let entity = Customer { id: 1, name: "Ada".into() }.to_entity();
/// assert_eq!(Customer::from_entity(&entity).unwrap().name, "Ada");
/// ```
pub trait EntityMapping: Sized {
    /// Entity type name used in the schema and store mappings.
    const ENTITY_TYPE: &'static str;

    /// The mapping descriptor for this type.
    fn descriptor() -> EntityDescriptor;

    /// Converts to a dynamic entity in state `New`.
    fn to_entity(&self) -> Entity;

    /// Converts from a dynamic entity.
    fn from_entity(entity: &Entity) -> CoreResult<Self>;
}
