//! Backend-neutral predicate tree.

use std::fmt;
use strata_codec::Value;

/// A comparison applied to one field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// Equal to the value; a null value matches missing or null fields.
    Eq(Value),
    /// Present and not equal to the value; against null, simply present.
    NotEq(Value),
    /// Within inclusive bounds. At least one bound is set.
    Range {
        /// Lower bound.
        gte: Option<Value>,
        /// Upper bound.
        lte: Option<Value>,
    },
    /// Equal to one of the values. Never empty.
    In(Vec<Value>),
}

/// A comparison on a dotted field path.
///
/// The first segment names a field of the entity. When it is a reference
/// field, the rest of the path is evaluated on the referenced type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// Dotted field path.
    pub path: String,
    /// The comparison.
    pub comparison: Comparison,
}

impl Term {
    /// The first path segment and the remainder, if any.
    #[must_use]
    pub fn split_path(&self) -> (&str, Option<&str>) {
        match self.path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (self.path.as_str(), None),
        }
    }
}

/// A predicate: terms combined in boolean groups.
///
/// Siblings in a group are joined with AND in the order written; a
/// negated group negates the conjunction of its children. An empty group
/// matches everything, negated or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// A single comparison.
    Term(Term),
    /// A conjunction, optionally negated.
    Group {
        /// Negates the whole group.
        negated: bool,
        /// Children, in the order written.
        children: Vec<Predicate>,
    },
}

impl Predicate {
    /// The predicate matching every entity.
    #[must_use]
    pub const fn all() -> Self {
        Predicate::Group {
            negated: false,
            children: Vec::new(),
        }
    }

    /// Returns true for a group with no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Predicate::Group { children, .. } if children.is_empty())
    }

    /// Visits every term, depth first, in the order written.
    pub fn terms(&self) -> Vec<&Term> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms<'a>(&'a self, out: &mut Vec<&'a Term>) {
        match self {
            Predicate::Term(term) => out.push(term),
            Predicate::Group { children, .. } => {
                for child in children {
                    child.collect_terms(out);
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Term(Term { path, comparison }) => match comparison {
                Comparison::Eq(v) => write!(f, "{path} = {v}"),
                Comparison::NotEq(v) => write!(f, "{path} != {v}"),
                Comparison::Range { gte, lte } => {
                    match gte {
                        Some(v) => write!(f, "{v} <= ")?,
                        None => f.write_str("* <= ")?,
                    }
                    write!(f, "{path}")?;
                    match lte {
                        Some(v) => write!(f, " <= {v}"),
                        None => f.write_str(" <= *"),
                    }
                }
                Comparison::In(values) => {
                    write!(f, "{path} in [")?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    f.write_str("]")
                }
            },
            Predicate::Group { negated, children } => {
                if *negated {
                    f.write_str("not ")?;
                }
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(path: &str, value: i64) -> Predicate {
        Predicate::Term(Term {
            path: path.into(),
            comparison: Comparison::Eq(Value::Integer(value)),
        })
    }

    #[test]
    fn split_path() {
        let t = Term {
            path: "items.sku".into(),
            comparison: Comparison::Eq(Value::Null),
        };
        assert_eq!(t.split_path(), ("items", Some("sku")));
    }

    #[test]
    fn terms_in_written_order() {
        let p = Predicate::Group {
            negated: false,
            children: vec![
                term("a", 1),
                Predicate::Group {
                    negated: true,
                    children: vec![term("b", 2), term("c", 3)],
                },
            ],
        };
        let paths: Vec<_> = p.terms().iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, ["a", "b", "c"]);
        assert_eq!(p.to_string(), "(a = 1 and not (b = 2 and c = 3))");
    }

    #[test]
    fn empty_group_matches_all() {
        assert!(Predicate::all().is_empty());
        assert!(!term("a", 1).is_empty());
    }
}
