//! Property-based test generators using proptest.
//!
//! Provides strategies for values, fixture entities and query builders
//! over the fixture's `Order` fields.

use crate::fixtures::item;
use proptest::prelude::*;
use strata_codec::Value;
use strata_core::{Entity, QueryBuilder};

/// Strategy for scalar values a field can hold.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for non-null values usable in comparisons.
pub fn comparable_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-1000i64..1000).prop_map(Value::Integer),
        "[a-z]{1,8}".prop_map(Value::Text),
    ]
}

/// Strategy for a batch of items with distinct product ids.
pub fn items_strategy(max: usize) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::btree_map(1i64..10_000, 1i64..100, 0..=max).prop_map(|products| {
        products
            .into_iter()
            .map(|(product, quantity)| item(product, quantity))
            .collect()
    })
}

/// One step of a generated query.
#[derive(Debug, Clone)]
pub enum QueryStep {
    /// `equals(field, value)`.
    Equals(&'static str, Value),
    /// `not_equals(field, value)`.
    NotEquals(&'static str, Value),
    /// `gte(field, value)`.
    Gte(&'static str, Value),
    /// `lte(field, value)`.
    Lte(&'static str, Value),
    /// `in_list(field, values)`.
    In(&'static str, Vec<Value>),
    /// A nested group, optionally negated.
    Group(bool, Vec<QueryStep>),
}

impl QueryStep {
    fn apply(self, builder: QueryBuilder) -> QueryBuilder {
        match self {
            QueryStep::Equals(f, v) => builder.equals(f, v),
            QueryStep::NotEquals(f, v) => builder.not_equals(f, v),
            QueryStep::Gte(f, v) => builder.gte(f, v),
            QueryStep::Lte(f, v) => builder.lte(f, v),
            QueryStep::In(f, vs) => builder.in_list(f, vs),
            QueryStep::Group(negated, steps) => {
                let opened = if negated {
                    builder.not_group()
                } else {
                    builder.group()
                };
                steps.into_iter().fold(opened, |b, s| s.apply(b)).end()
            }
        }
    }
}

/// Applies generated steps to a fresh builder.
#[must_use]
pub fn build_query(steps: Vec<QueryStep>) -> QueryBuilder {
    steps
        .into_iter()
        .fold(QueryBuilder::new(), |b, s| s.apply(b))
}

fn order_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["orderId", "customer", "status"])
}

fn term_step() -> impl Strategy<Value = QueryStep> {
    prop_oneof![
        (order_field(), comparable_strategy()).prop_map(|(f, v)| QueryStep::Equals(f, v)),
        (order_field(), comparable_strategy()).prop_map(|(f, v)| QueryStep::NotEquals(f, v)),
        (order_field(), comparable_strategy()).prop_map(|(f, v)| QueryStep::Gte(f, v)),
        (order_field(), comparable_strategy()).prop_map(|(f, v)| QueryStep::Lte(f, v)),
        (order_field(), prop::collection::vec(comparable_strategy(), 1..4))
            .prop_map(|(f, vs)| QueryStep::In(f, vs)),
    ]
}

/// Strategy for well-formed queries over local `Order` fields, nested up
/// to two groups deep.
pub fn order_query_strategy() -> impl Strategy<Value = Vec<QueryStep>> {
    let step = term_step().prop_recursive(2, 12, 4, |inner| {
        prop_oneof![
            term_step(),
            (any::<bool>(), prop::collection::vec(inner, 1..4))
                .prop_map(|(negated, steps)| QueryStep::Group(negated, steps)),
        ]
    });
    prop::collection::vec(step, 0..5)
}
