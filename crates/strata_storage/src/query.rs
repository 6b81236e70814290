//! Native query representations.
//!
//! Each store kind has its own query language:
//! - relational stores execute [`SqlStatement`]s
//! - search indices execute [`SearchRequest`]s (a structured filter tree)
//! - object stores execute [`ObjectQuery`]s (key-prefix listing plus a filter)
//!
//! The query builder in `strata_core` renders backend-neutral predicates
//! into these types; drivers never see the neutral form.

use crate::kind::StoreKind;
use crate::layout::{Analyzer, CollectionLayout};
use std::cmp::Ordering;
use std::fmt;
use strata_codec::{row_path, Row, Value};

/// A key: ordered (field, value) pairs.
pub type RowKey = Vec<(String, Value)>;

/// Renders a key for messages and logs.
#[must_use]
pub fn format_key(key: &RowKey) -> String {
    let parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("({})", parts.join(", "))
}

/// Quotes an SQL identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Offset/limit window over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return; `None` for all.
    pub limit: Option<usize>,
}

impl Page {
    /// A page of `limit` rows starting at `offset`.
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Applies the window to an already-filtered sequence.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// A parameterized SQL statement with `?N` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    /// Statement text.
    pub sql: String,
    /// Positional parameters; `params[0]` binds `?1`.
    pub params: Vec<Value>,
}

impl SqlStatement {
    /// Creates a statement.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A structured filter, evaluated by search indices and object stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    /// Matches every document.
    MatchAll,
    /// Field equals value (a null value matches missing or null fields).
    Term {
        /// Dotted field path.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Field equals any of the values.
    Terms {
        /// Dotted field path.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Field within inclusive bounds.
    Range {
        /// Dotted field path.
        field: String,
        /// Lower bound.
        gte: Option<Value>,
        /// Upper bound.
        lte: Option<Value>,
    },
    /// Field present and non-null.
    Exists {
        /// Dotted field path.
        field: String,
    },
    /// Boolean combination.
    Bool {
        /// All must match.
        must: Vec<FilterNode>,
        /// None may match.
        must_not: Vec<FilterNode>,
        /// At least one must match, when non-empty.
        should: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Conjunction of nodes, collapsing trivial cases.
    #[must_use]
    pub fn all(mut nodes: Vec<FilterNode>) -> Self {
        nodes.retain(|n| *n != FilterNode::MatchAll);
        match nodes.len() {
            0 => FilterNode::MatchAll,
            1 => nodes.remove(0),
            _ => FilterNode::Bool {
                must: nodes,
                must_not: Vec::new(),
                should: Vec::new(),
            },
        }
    }

    /// Disjunction of nodes.
    #[must_use]
    pub fn any(mut nodes: Vec<FilterNode>) -> Self {
        if nodes.len() == 1 {
            return nodes.remove(0);
        }
        FilterNode::Bool {
            must: Vec::new(),
            must_not: Vec::new(),
            should: nodes,
        }
    }

    /// Negation.
    #[must_use]
    pub fn not(node: FilterNode) -> Self {
        FilterNode::Bool {
            must: Vec::new(),
            must_not: vec![node],
            should: Vec::new(),
        }
    }

    /// Evaluates the filter against a row.
    ///
    /// The layout supplies analyzers; without one every comparison is exact.
    #[must_use]
    pub fn matches(&self, row: &Row, layout: Option<&CollectionLayout>) -> bool {
        let analyzer = |field: &str| layout.and_then(|l| l.analyzer(field));
        match self {
            FilterNode::MatchAll => true,
            FilterNode::Term { field, value } => match row_path(row, field) {
                None | Some(Value::Null) => value.is_null(),
                Some(actual) => term_matches(actual, value, analyzer(field.as_str())),
            },
            FilterNode::Terms { field, values } => row_path(row, field).is_some_and(|actual| {
                values
                    .iter()
                    .any(|v| term_matches(actual, v, analyzer(field.as_str())))
            }),
            FilterNode::Range { field, gte, lte } => row_path(row, field).is_some_and(|actual| {
                range_matches(actual, gte.as_ref(), lte.as_ref(), analyzer(field.as_str()))
            }),
            FilterNode::Exists { field } => {
                row_path(row, field).is_some_and(|actual| !actual.is_null())
            }
            FilterNode::Bool {
                must,
                must_not,
                should,
            } => {
                must.iter().all(|n| n.matches(row, layout))
                    && !must_not.iter().any(|n| n.matches(row, layout))
                    && (should.is_empty() || should.iter().any(|n| n.matches(row, layout)))
            }
        }
    }

    /// Renders the filter in the search index's JSON query DSL.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            FilterNode::MatchAll => json!({ "match_all": {} }),
            FilterNode::Term { field, value } => json!({ "term": { field: value.to_json() } }),
            FilterNode::Terms { field, values } => {
                let values: Vec<_> = values.iter().map(Value::to_json).collect();
                json!({ "terms": { field: values } })
            }
            FilterNode::Range { field, gte, lte } => {
                let mut bounds = serde_json::Map::new();
                if let Some(v) = gte {
                    bounds.insert("gte".into(), v.to_json());
                }
                if let Some(v) = lte {
                    bounds.insert("lte".into(), v.to_json());
                }
                json!({ "range": { field: bounds } })
            }
            FilterNode::Exists { field } => json!({ "exists": { "field": field } }),
            FilterNode::Bool {
                must,
                must_not,
                should,
            } => {
                let mut body = serde_json::Map::new();
                let clauses = [("must", must), ("must_not", must_not), ("should", should)];
                for (name, nodes) in clauses {
                    if !nodes.is_empty() {
                        let rendered: Vec<_> = nodes.iter().map(FilterNode::to_json).collect();
                        body.insert(name.into(), serde_json::Value::Array(rendered));
                    }
                }
                if !should.is_empty() {
                    body.insert("minimum_should_match".into(), json!(1));
                }
                json!({ "bool": body })
            }
        }
    }
}

fn term_matches(actual: &Value, expected: &Value, analyzer: Option<Analyzer>) -> bool {
    if let Value::Array(items) = actual {
        return items.iter().any(|v| term_matches(v, expected, analyzer));
    }
    match (analyzer, actual, expected) {
        (Some(a), Value::Text(text), Value::Text(term)) => {
            a.tokens(text).contains(&a.normalize_term(term))
        }
        _ => actual.loosely_equals(expected),
    }
}

fn range_matches(
    actual: &Value,
    gte: Option<&Value>,
    lte: Option<&Value>,
    analyzer: Option<Analyzer>,
) -> bool {
    if let Value::Array(items) = actual {
        return items.iter().any(|v| range_matches(v, gte, lte, analyzer));
    }
    let normalize = |v: &Value| match (analyzer, v) {
        (Some(a), Value::Text(t)) => Value::Text(a.normalize_term(t)),
        _ => v.clone(),
    };
    let actual = normalize(actual);
    let lower_ok = gte.map_or(true, |bound| {
        matches!(
            actual.compare_natural(&normalize(bound)),
            Some(Ordering::Greater | Ordering::Equal)
        )
    });
    let upper_ok = lte.map_or(true, |bound| {
        matches!(
            actual.compare_natural(&normalize(bound)),
            Some(Ordering::Less | Ordering::Equal)
        )
    });
    lower_ok && upper_ok
}

/// A search index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Target index (collection).
    pub index: String,
    /// Filter tree.
    pub filter: FilterNode,
    /// Result window.
    pub page: Page,
}

impl SearchRequest {
    /// Renders the request body in the search DSL.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({ "query": self.filter.to_json() });
        if self.page.offset > 0 {
            body["from"] = serde_json::json!(self.page.offset);
        }
        if let Some(limit) = self.page.limit {
            body["size"] = serde_json::json!(limit);
        }
        body
    }
}

/// An object store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectQuery {
    /// Target collection (key namespace inside the bucket).
    pub collection: String,
    /// Leading key values narrowing the listing to a key prefix.
    pub key_prefix: Vec<Value>,
    /// Filter applied to each listed object.
    pub filter: FilterNode,
    /// Result window.
    pub page: Page,
}

/// A query in some store's native language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeQuery {
    /// SQL for relational stores.
    Sql(SqlStatement),
    /// Filter request for search indices.
    Search(SearchRequest),
    /// Listing for object stores.
    Objects(ObjectQuery),
}

impl NativeQuery {
    /// The store kind this query is written for.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        match self {
            NativeQuery::Sql(_) => StoreKind::Relational,
            NativeQuery::Search(_) => StoreKind::SearchIndex,
            NativeQuery::Objects(_) => StoreKind::ObjectStorage,
        }
    }

    /// Returns the SQL statement, if this is one.
    #[must_use]
    pub const fn as_sql(&self) -> Option<&SqlStatement> {
        match self {
            NativeQuery::Sql(stmt) => Some(stmt),
            _ => None,
        }
    }
}

impl fmt::Display for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeQuery::Sql(stmt) => write!(f, "{stmt}"),
            NativeQuery::Search(req) => write!(f, "{}: {}", req.index, req.to_json()),
            NativeQuery::Objects(q) => {
                let prefix: Vec<String> = q.key_prefix.iter().map(Value::key_segment).collect();
                write!(
                    f,
                    "{}/{}* {}",
                    q.collection,
                    prefix.join("/"),
                    q.filter.to_json()
                )
            }
        }
    }
}
