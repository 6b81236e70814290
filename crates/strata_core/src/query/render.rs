//! Translation of predicates into native queries.
//!
//! Relational stores get parameterized SQL, search indices and object
//! stores get a [`FilterNode`] tree. Paths that cross a reference are
//! rewritten:
//!
//! - into a sub-select when the target lives in a table of the same
//!   relational store and the join has a single column
//! - otherwise into an existence condition on the source join columns,
//!   whose values are fetched up front from the target's store through
//!   [`PathResolver::semi_join`]

use super::predicate::{Comparison, Predicate, Term};
use crate::entity::{EntityDescriptor, ReferenceDecl};
use crate::error::{CoreError, CoreResult};
use crate::registry::StoreHandle;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_codec::Value;
use strata_storage::{
    quote_identifier, FilterNode, NativeQuery, ObjectQuery, Page, SearchRequest, SqlStatement,
    StoreKind,
};

/// Answers the questions the renderer cannot answer from one descriptor:
/// where referenced types live and which join values match a filter there.
pub trait PathResolver {
    /// Descriptor of an entity type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for undeclared types.
    fn descriptor(&self, entity_type: &str) -> CoreResult<Arc<EntityDescriptor>>;

    /// The store hosting `entity_type`, under `kind` or its preferred kind.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no store qualifies.
    fn store_for(&self, entity_type: &str, kind: Option<StoreKind>) -> CoreResult<StoreHandle>;

    /// Distinct values of the reference's target join columns over target
    /// entities matching `filter`, in target column order.
    ///
    /// # Errors
    ///
    /// Returns the failure of the target store.
    fn semi_join(&mut self, decl: &ReferenceDecl, filter: &Predicate)
        -> CoreResult<Vec<Vec<Value>>>;
}

/// Renders `predicate` against `descriptor`'s collection on `store`.
///
/// The result is unpaged; see [`paged`].
///
/// # Errors
///
/// Returns an invalid query error for unknown fields, paths ending at a
/// reference, nested paths on relational stores and empty ranges. Errors
/// raised while resolving a reference are reported as reference
/// resolution errors.
pub fn render(
    predicate: &Predicate,
    descriptor: &EntityDescriptor,
    store: &StoreHandle,
    resolver: &mut dyn PathResolver,
) -> CoreResult<NativeQuery> {
    match store.kind() {
        StoreKind::Relational => {
            let mut writer = SqlWriter {
                params: Vec::new(),
                store,
                resolver,
            };
            let condition = writer.predicate(predicate, descriptor, false)?;
            Ok(NativeQuery::Sql(SqlStatement::new(
                select(descriptor, condition.as_deref()),
                writer.params,
            )))
        }
        StoreKind::SearchIndex => {
            let filter = FilterWriter { resolver }
                .predicate(predicate, descriptor)?
                .unwrap_or(FilterNode::MatchAll);
            Ok(NativeQuery::Search(SearchRequest {
                index: descriptor.collection_name().to_string(),
                filter,
                page: Page::default(),
            }))
        }
        StoreKind::ObjectStorage => {
            let filter = FilterWriter { resolver }
                .predicate(predicate, descriptor)?
                .unwrap_or(FilterNode::MatchAll);
            Ok(NativeQuery::Objects(ObjectQuery {
                collection: descriptor.collection_name().to_string(),
                key_prefix: key_prefix(predicate, descriptor),
                filter,
                page: Page::default(),
            }))
        }
    }
}

/// Applies a result window to a rendered query.
#[must_use]
pub fn paged(query: &NativeQuery, page: Page) -> NativeQuery {
    match query {
        NativeQuery::Sql(stmt) => {
            let mut sql = stmt.sql.clone();
            match (page.limit, page.offset) {
                (Some(limit), 0) => sql.push_str(&format!(" LIMIT {limit}")),
                (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
                (None, 0) => {}
                (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            }
            NativeQuery::Sql(SqlStatement::new(sql, stmt.params.clone()))
        }
        NativeQuery::Search(req) => NativeQuery::Search(SearchRequest {
            page,
            ..req.clone()
        }),
        NativeQuery::Objects(q) => NativeQuery::Objects(ObjectQuery { page, ..q.clone() }),
    }
}

/// Renders a lookup of the rows of `descriptor` whose `columns` match one
/// of `tuples`, in key order.
pub(crate) fn tuple_lookup(
    descriptor: &EntityDescriptor,
    kind: StoreKind,
    columns: &[&str],
    tuples: &[Vec<Value>],
) -> NativeQuery {
    match kind {
        StoreKind::Relational => {
            let mut params = Vec::new();
            let condition = sql_tuples(columns, tuples, &mut params);
            NativeQuery::Sql(SqlStatement::new(
                select(descriptor, Some(condition.as_str())),
                params,
            ))
        }
        StoreKind::SearchIndex => NativeQuery::Search(SearchRequest {
            index: descriptor.collection_name().to_string(),
            filter: filter_tuples(columns, tuples),
            page: Page::default(),
        }),
        StoreKind::ObjectStorage => {
            let key_prefix = match tuples {
                [only] => descriptor
                    .key_fields()
                    .iter()
                    .map_while(|k| {
                        columns
                            .iter()
                            .position(|c| *c == k.as_str())
                            .map(|i| only[i].clone())
                    })
                    .collect(),
                _ => Vec::new(),
            };
            NativeQuery::Objects(ObjectQuery {
                collection: descriptor.collection_name().to_string(),
                key_prefix,
                filter: filter_tuples(columns, tuples),
                page: Page::default(),
            })
        }
    }
}

/// Column tagging each row of an override lookup with the index of the
/// tuple it was fetched for.
pub(crate) const TUPLE_COLUMN: &str = "__tuple";

/// Renders a caller-supplied reference query for a whole batch of tuples
/// as one statement.
///
/// The query runs once per tuple as a `UNION ALL` arm with its `?1..?n`
/// placeholders shifted onto that tuple's parameters; each arm tags its
/// rows with the tuple's index in [`TUPLE_COLUMN`].
pub(crate) fn override_lookup(sql: &str, tuples: &[Vec<Value>]) -> NativeQuery {
    let body = sql.trim().trim_end_matches(';').trim_end();
    let tag = quote_identifier(TUPLE_COLUMN);
    let mut params = Vec::new();
    let arms: Vec<String> = tuples
        .iter()
        .enumerate()
        .map(|(i, tuple)| {
            let arm = format!(
                "SELECT {i} AS {tag}, * FROM ({})",
                shift_placeholders(body, params.len())
            );
            params.extend(tuple.iter().cloned());
            arm
        })
        .collect();
    NativeQuery::Sql(SqlStatement::new(arms.join(" UNION ALL "), params))
}

/// Adds `offset` to every `?N` placeholder outside quoted text. Bare `?`
/// placeholders are numbered in order of appearance first.
fn shift_placeholders(sql: &str, offset: usize) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut quote = None;
    let mut bare = 0;
    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '?' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let index = digits.parse::<usize>().unwrap_or_else(|_| {
                    bare += 1;
                    bare
                });
                out.push('?');
                out.push_str(&(offset + index).to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn select(descriptor: &EntityDescriptor, condition: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT * FROM {}",
        quote_identifier(descriptor.collection_name())
    );
    if let Some(condition) = condition {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    let order: Vec<String> = descriptor
        .key_fields()
        .iter()
        .map(|k| quote_identifier(k))
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));
    sql
}

fn bind(params: &mut Vec<Value>, value: Value) -> String {
    params.push(value);
    format!("?{}", params.len())
}

fn sql_tuples<S: AsRef<str>>(columns: &[S], tuples: &[Vec<Value>], params: &mut Vec<Value>) -> String {
    if tuples.is_empty() {
        return "1 = 0".to_string();
    }
    if let [column] = columns {
        let list: Vec<String> = tuples
            .iter()
            .map(|t| bind(params, t[0].clone()))
            .collect();
        return format!("{} IN ({})", quote_identifier(column.as_ref()), list.join(", "));
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_identifier(c.as_ref())).collect();
    let rows: Vec<String> = tuples
        .iter()
        .map(|t| {
            let vals: Vec<String> = t.iter().map(|v| bind(params, v.clone())).collect();
            format!("({})", vals.join(", "))
        })
        .collect();
    format!("({}) IN (VALUES {})", cols.join(", "), rows.join(", "))
}

fn filter_tuples<S: AsRef<str>>(columns: &[S], tuples: &[Vec<Value>]) -> FilterNode {
    if tuples.is_empty() {
        return FilterNode::not(FilterNode::MatchAll);
    }
    if let [column] = columns {
        return FilterNode::Terms {
            field: column.as_ref().to_string(),
            values: tuples.iter().map(|t| t[0].clone()).collect(),
        };
    }
    FilterNode::any(
        tuples
            .iter()
            .map(|t| {
                FilterNode::all(
                    columns
                        .iter()
                        .zip(t)
                        .map(|(c, v)| FilterNode::Term {
                            field: c.as_ref().to_string(),
                            value: v.clone(),
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Leading key values pinned by top-level equality terms.
fn key_prefix(predicate: &Predicate, descriptor: &EntityDescriptor) -> Vec<Value> {
    let top: Vec<&Predicate> = match predicate {
        Predicate::Group {
            negated: false,
            children,
        } => children.iter().collect(),
        Predicate::Group { negated: true, .. } => Vec::new(),
        term => vec![term],
    };
    let pinned: BTreeMap<&str, &Value> = top
        .into_iter()
        .filter_map(|p| match p {
            Predicate::Term(Term {
                path,
                comparison: Comparison::Eq(value),
            }) if !value.is_null() => Some((path.as_str(), value)),
            _ => None,
        })
        .collect();
    descriptor
        .key_fields()
        .iter()
        .map_while(|k| pinned.get(k.as_str()).map(|v| (*v).clone()))
        .collect()
}

/// Where a term's path leads.
enum Path<'d> {
    Value { field: &'d str, nested: bool },
    Reference {
        field: &'d str,
        decl: &'d ReferenceDecl,
        inner: Term,
    },
}

fn classify<'d>(descriptor: &'d EntityDescriptor, term: &Term) -> CoreResult<Path<'d>> {
    let (head, rest) = term.split_path();
    let Some(field) = descriptor.field_descriptor(head) else {
        return Err(CoreError::invalid_query(format!(
            "{} has no field {head}",
            descriptor.entity_type()
        )));
    };
    if let Some(decl) = descriptor.reference_decl(head) {
        let Some(rest) = rest else {
            return Err(CoreError::invalid_query(format!(
                "path {} ends at reference {}.{head}",
                term.path,
                descriptor.entity_type()
            )));
        };
        return Ok(Path::Reference {
            field: &field.name,
            decl,
            inner: Term {
                path: rest.to_string(),
                comparison: term.comparison.clone(),
            },
        });
    }
    if !descriptor.is_value_field(head) {
        return Err(CoreError::invalid_query(format!(
            "{}.{head} is not stored",
            descriptor.entity_type()
        )));
    }
    Ok(Path::Value {
        field: &field.name,
        nested: rest.is_some(),
    })
}

fn target_store(
    resolver: &dyn PathResolver,
    descriptor: &EntityDescriptor,
    field: &str,
    decl: &ReferenceDecl,
) -> CoreResult<StoreHandle> {
    resolver
        .store_for(&decl.target_type, decl.target_kind)
        .map_err(|e| e.into_reference(descriptor.entity_type(), field, "?"))
}

struct SqlWriter<'a> {
    params: Vec<Value>,
    store: &'a StoreHandle,
    resolver: &'a mut dyn PathResolver,
}

impl SqlWriter<'_> {
    fn predicate(
        &mut self,
        predicate: &Predicate,
        descriptor: &EntityDescriptor,
        nested: bool,
    ) -> CoreResult<Option<String>> {
        match predicate {
            Predicate::Term(term) => self.term(term, descriptor).map(Some),
            Predicate::Group { negated, children } => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(part) = self.predicate(child, descriptor, true)? {
                        parts.push(part);
                    }
                }
                Ok(match parts.len() {
                    0 => None,
                    _ if *negated => Some(format!("NOT ({})", parts.join(" AND "))),
                    1 => parts.pop(),
                    _ if nested => Some(format!("({})", parts.join(" AND "))),
                    _ => Some(parts.join(" AND ")),
                })
            }
        }
    }

    fn term(&mut self, term: &Term, descriptor: &EntityDescriptor) -> CoreResult<String> {
        match classify(descriptor, term)? {
            Path::Value { nested: true, .. } => Err(CoreError::invalid_query(format!(
                "nested path {} cannot be queried on relational store {}",
                term.path,
                self.store.name()
            ))),
            Path::Value { field, .. } => self.comparison(field, &term.comparison),
            Path::Reference { field, decl, inner } => {
                let target = self.resolver.descriptor(&decl.target_type)?;
                let store = target_store(&*self.resolver, descriptor, field, decl)?;
                if store.name() == self.store.name()
                    && decl.join_columns.len() == 1
                    && decl.query.is_none()
                {
                    let (source, target_col) = &decl.join_columns[0];
                    let condition = self.term(&inner, &target)?;
                    return Ok(format!(
                        "{} IN (SELECT {} FROM {} WHERE {condition})",
                        quote_identifier(source),
                        quote_identifier(target_col),
                        quote_identifier(target.collection_name())
                    ));
                }
                let tuples = self
                    .resolver
                    .semi_join(decl, &Predicate::Term(inner))
                    .map_err(|e| e.into_reference(descriptor.entity_type(), field, store.name()))?;
                let columns: Vec<&str> = decl.source_columns().collect();
                Ok(sql_tuples(&columns, &tuples, &mut self.params))
            }
        }
    }

    fn comparison(&mut self, field: &str, comparison: &Comparison) -> CoreResult<String> {
        let column = quote_identifier(field);
        Ok(match comparison {
            Comparison::Eq(Value::Null) => format!("{column} IS NULL"),
            Comparison::Eq(value) => format!("{column} = {}", bind(&mut self.params, value.clone())),
            Comparison::NotEq(Value::Null) => format!("{column} IS NOT NULL"),
            Comparison::NotEq(value) => {
                format!("{column} != {}", bind(&mut self.params, value.clone()))
            }
            Comparison::Range {
                gte: Some(gte),
                lte: Some(lte),
            } => {
                let lower = bind(&mut self.params, gte.clone());
                let upper = bind(&mut self.params, lte.clone());
                format!("({column} >= {lower} AND {column} <= {upper})")
            }
            Comparison::Range {
                gte: Some(gte),
                lte: None,
            } => format!("{column} >= {}", bind(&mut self.params, gte.clone())),
            Comparison::Range {
                gte: None,
                lte: Some(lte),
            } => format!("{column} <= {}", bind(&mut self.params, lte.clone())),
            Comparison::Range {
                gte: None,
                lte: None,
            } => return Err(CoreError::invalid_query(format!("range on {field} has no bounds"))),
            Comparison::In(values) => {
                let list: Vec<String> = values
                    .iter()
                    .map(|v| bind(&mut self.params, v.clone()))
                    .collect();
                format!("{column} IN ({})", list.join(", "))
            }
        })
    }
}

struct FilterWriter<'a> {
    resolver: &'a mut dyn PathResolver,
}

impl FilterWriter<'_> {
    fn predicate(
        &mut self,
        predicate: &Predicate,
        descriptor: &EntityDescriptor,
    ) -> CoreResult<Option<FilterNode>> {
        match predicate {
            Predicate::Term(term) => self.term(term, descriptor).map(Some),
            Predicate::Group { negated, children } => {
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(node) = self.predicate(child, descriptor)? {
                        nodes.push(node);
                    }
                }
                if nodes.is_empty() {
                    return Ok(None);
                }
                let node = FilterNode::all(nodes);
                Ok(Some(if *negated { FilterNode::not(node) } else { node }))
            }
        }
    }

    fn term(&mut self, term: &Term, descriptor: &EntityDescriptor) -> CoreResult<FilterNode> {
        match classify(descriptor, term)? {
            Path::Value { .. } => comparison(&term.path, &term.comparison),
            Path::Reference { field, decl, inner } => {
                let store = target_store(&*self.resolver, descriptor, field, decl)?;
                let tuples = self
                    .resolver
                    .semi_join(decl, &Predicate::Term(inner))
                    .map_err(|e| e.into_reference(descriptor.entity_type(), field, store.name()))?;
                let columns: Vec<&str> = decl.source_columns().collect();
                Ok(filter_tuples(&columns, &tuples))
            }
        }
    }
}

fn comparison(field: &str, comparison: &Comparison) -> CoreResult<FilterNode> {
    let field = field.to_string();
    Ok(match comparison {
        Comparison::Eq(value) => FilterNode::Term {
            field,
            value: value.clone(),
        },
        Comparison::NotEq(Value::Null) => FilterNode::Exists { field },
        Comparison::NotEq(value) => FilterNode::Bool {
            must: vec![FilterNode::Exists {
                field: field.clone(),
            }],
            must_not: vec![FilterNode::Term {
                field,
                value: value.clone(),
            }],
            should: Vec::new(),
        },
        Comparison::Range { gte: None, lte: None } => {
            return Err(CoreError::invalid_query(format!("range on {field} has no bounds")))
        }
        Comparison::Range { gte, lte } => FilterNode::Range {
            field,
            gte: gte.clone(),
            lte: lte.clone(),
        },
        Comparison::In(values) => FilterNode::Terms {
            field,
            values: values.clone(),
        },
    })
}
