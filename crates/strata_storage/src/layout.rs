//! Physical collection layouts handed to drivers at provisioning time.

use serde::{Deserialize, Serialize};

/// How a search index analyzes a text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analyzer {
    /// Exact, case-sensitive matching.
    Keyword,
    /// Case-insensitive matching of the whole value.
    Lowercase,
    /// Lowercased and split into alphanumeric tokens; a term matches any token.
    Standard,
}

impl Analyzer {
    /// Splits and normalizes text according to this analyzer.
    #[must_use]
    pub fn tokens(self, text: &str) -> Vec<String> {
        match self {
            Analyzer::Keyword => vec![text.to_string()],
            Analyzer::Lowercase => vec![text.to_lowercase()],
            Analyzer::Standard => text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }

    /// Normalizes a single query term.
    #[must_use]
    pub fn normalize_term(self, term: &str) -> String {
        match self {
            Analyzer::Keyword => term.to_string(),
            Analyzer::Lowercase | Analyzer::Standard => term.to_lowercase(),
        }
    }
}

/// One stored field of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field (column) name.
    pub name: String,
    /// Analyzer, for search indices only.
    pub analyzer: Option<Analyzer>,
}

/// The physical shape of one collection (table, key prefix, index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLayout {
    /// Collection name.
    pub name: String,
    /// Key fields, in key order.
    pub key_fields: Vec<String>,
    /// All stored fields, key fields included.
    pub fields: Vec<FieldLayout>,
}

impl CollectionLayout {
    /// Returns the analyzer configured for a (possibly dotted) field.
    ///
    /// Nested paths inherit the analyzer of their top-level field.
    #[must_use]
    pub fn analyzer(&self, path: &str) -> Option<Analyzer> {
        let head = path.split('.').next().unwrap_or(path);
        self.fields
            .iter()
            .find(|f| f.name == head)
            .and_then(|f| f.analyzer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_analyzer_tokenizes() {
        assert_eq!(
            Analyzer::Standard.tokens("Red-Wine, 75cl"),
            vec!["red", "wine", "75cl"]
        );
        assert_eq!(Analyzer::Keyword.tokens("Red Wine"), vec!["Red Wine"]);
        assert_eq!(Analyzer::Lowercase.tokens("Red Wine"), vec!["red wine"]);
    }

    #[test]
    fn nested_paths_inherit_analyzer() {
        let layout = CollectionLayout {
            name: "items".into(),
            key_fields: vec!["sku".into()],
            fields: vec![
                FieldLayout {
                    name: "sku".into(),
                    analyzer: None,
                },
                FieldLayout {
                    name: "details".into(),
                    analyzer: Some(Analyzer::Lowercase),
                },
            ],
        };
        assert_eq!(layout.analyzer("details.color"), Some(Analyzer::Lowercase));
        assert_eq!(layout.analyzer("sku"), None);
    }
}
