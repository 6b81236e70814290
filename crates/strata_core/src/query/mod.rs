//! Backend-neutral query predicates.
//!
//! [`QueryBuilder`] assembles a [`Predicate`] from terms over dotted field
//! paths; [`render`] translates it into the native query of the store
//! hosting the entity type. The builder has no dependency on stores:
//! everything it needs to know about them comes through a
//! [`PathResolver`].

mod builder;
mod predicate;
mod render;

pub use builder::QueryBuilder;
pub use predicate::{Comparison, Predicate, Term};
pub use render::{paged, render, PathResolver};

pub(crate) use render::{override_lookup, tuple_lookup, TUPLE_COLUMN};
