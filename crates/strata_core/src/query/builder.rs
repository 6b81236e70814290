//! Fluent predicate builder.

use super::predicate::{Comparison, Predicate, Term};
use super::render::{render, PathResolver};
use crate::error::{CoreError, CoreResult};
use strata_codec::Value;
use strata_storage::{NativeQuery, StoreKind};

/// Builds a [`Predicate`] term by term.
///
/// Terms are added to the innermost open group. `group()` and
/// `not_group()` open a nested group, `end()` closes it. Mistakes are
/// remembered and reported by [`build`](Self::build), so calls can be
/// chained freely.
///
/// # Example
///
/// ```rust
/// use strata_core::QueryBuilder;
///
/// let predicate = QueryBuilder::new()
///     .equals("status", "open")
///     .not_group()
///         .equals("customer", "acme")
///         .gte("total", 100)
///     .end()
///     .build()
///     .unwrap();
/// assert_eq!(predicate.terms().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    groups: Vec<(bool, Vec<Predicate>)>,
    error: Option<String>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Starts an empty predicate, which matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: vec![(false, Vec::new())],
            error: None,
        }
    }

    fn push(mut self, path: impl Into<String>, comparison: Comparison) -> Self {
        let path = path.into();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            self.fail(format!("malformed field path {path:?}"));
        }
        if let Some((_, children)) = self.groups.last_mut() {
            children.push(Predicate::Term(Term { path, comparison }));
        }
        self
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// Field equals value.
    #[must_use]
    pub fn equals(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(path, Comparison::Eq(value.into()))
    }

    /// Field present and not equal to value.
    #[must_use]
    pub fn not_equals(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(path, Comparison::NotEq(value.into()))
    }

    /// Field within inclusive bounds.
    #[must_use]
    pub fn range(
        self,
        path: impl Into<String>,
        gte: impl Into<Value>,
        lte: impl Into<Value>,
    ) -> Self {
        self.push(
            path,
            Comparison::Range {
                gte: Some(gte.into()),
                lte: Some(lte.into()),
            },
        )
    }

    /// Field greater than or equal to value.
    #[must_use]
    pub fn gte(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(
            path,
            Comparison::Range {
                gte: Some(value.into()),
                lte: None,
            },
        )
    }

    /// Field less than or equal to value.
    #[must_use]
    pub fn lte(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(
            path,
            Comparison::Range {
                gte: None,
                lte: Some(value.into()),
            },
        )
    }

    /// Field equals one of the values.
    #[must_use]
    pub fn in_list<V: Into<Value>>(
        mut self,
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let path = path.into();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.fail(format!("in() on {path} needs at least one value"));
        }
        self.push(path, Comparison::In(values))
    }

    /// Opens a group.
    #[must_use]
    pub fn group(mut self) -> Self {
        self.groups.push((false, Vec::new()));
        self
    }

    /// Opens a negated group.
    #[must_use]
    pub fn not_group(mut self) -> Self {
        self.groups.push((true, Vec::new()));
        self
    }

    /// Closes the innermost group.
    #[must_use]
    pub fn end(mut self) -> Self {
        if self.groups.len() < 2 {
            self.fail("end() without an open group".into());
            return self;
        }
        if let Some((negated, children)) = self.groups.pop() {
            if let Some((_, parent)) = self.groups.last_mut() {
                parent.push(Predicate::Group { negated, children });
            }
        }
        self
    }

    /// Finishes the predicate.
    ///
    /// # Errors
    ///
    /// Returns an invalid query error for unbalanced groups, empty `in`
    /// lists or malformed paths.
    pub fn build(&self) -> CoreResult<Predicate> {
        if let Some(message) = &self.error {
            return Err(CoreError::invalid_query(message.clone()));
        }
        if self.groups.len() != 1 {
            return Err(CoreError::invalid_query(format!(
                "{} group(s) left open",
                self.groups.len() - 1
            )));
        }
        let children = self.groups[0].1.clone();
        Ok(Predicate::Group {
            negated: false,
            children,
        })
    }

    /// Builds the predicate and translates it for the store hosting
    /// `root_type` under `kind`.
    ///
    /// Paths crossing references are rewritten through `resolver`, which
    /// may query the stores hosting the referenced types.
    ///
    /// # Errors
    ///
    /// Returns the [`build`](Self::build) error, or any error raised while
    /// rendering.
    pub fn parse(
        &self,
        root_type: &str,
        kind: StoreKind,
        resolver: &mut dyn PathResolver,
    ) -> CoreResult<NativeQuery> {
        let predicate = self.build()?;
        let descriptor = resolver.descriptor(root_type)?;
        let store = resolver.store_for(root_type, Some(kind))?;
        render(&predicate, &descriptor, &store, resolver)
    }
}
