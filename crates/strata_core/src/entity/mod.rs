//! Entity records, lifecycle states and mapping descriptors.

mod descriptor;
mod mapping;
mod record;
mod state;

pub use descriptor::{
    EntityDescriptor, FieldDescriptor, FieldRole, IndexSettings, ReferenceDecl, Validator,
};
pub use mapping::EntityMapping;
pub use record::{Binding, Entity};
pub use state::EntityState;
