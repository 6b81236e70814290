//! Environment configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_storage::{ConnectionConfig, StoreKind};

/// One store to register when the environment opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unique store name.
    pub name: String,
    /// Implementation kind, fixed for the store's lifetime.
    pub kind: StoreKind,
    /// Connection parameters.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Configuration for opening an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Stores, in registration order.
    pub stores: Vec<StoreConfig>,

    /// Entity type to eligible store kinds, in preference order.
    pub mappings: BTreeMap<String, Vec<StoreKind>>,

    /// Rows fetched per page by `search`, and tuples per batched
    /// reference query.
    pub search_batch_size: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            mappings: BTreeMap::new(),
            search_batch_size: 100,
        }
    }
}

impl EnvironmentConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration handed over as JSON.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the document is malformed.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::configuration(format!("malformed environment config: {e}")))
    }

    /// Adds a store.
    #[must_use]
    pub fn store(
        mut self,
        name: impl Into<String>,
        kind: StoreKind,
        connection: ConnectionConfig,
    ) -> Self {
        self.stores.push(StoreConfig {
            name: name.into(),
            kind,
            connection,
        });
        self
    }

    /// Maps an entity type to its eligible store kinds.
    #[must_use]
    pub fn map(mut self, entity_type: impl Into<String>, kinds: impl IntoIterator<Item = StoreKind>) -> Self {
        self.mappings
            .insert(entity_type.into(), kinds.into_iter().collect());
        self
    }

    /// Sets the search page and reference batch size.
    #[must_use]
    pub fn search_batch_size(mut self, size: usize) -> Self {
        self.search_batch_size = size;
        self
    }

    /// Eligible kinds of an entity type, in preference order.
    #[must_use]
    pub fn eligible_kinds(&self, entity_type: &str) -> &[StoreKind] {
        self.mappings
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::PoolPolicy;

    #[test]
    fn default_config() {
        let config = EnvironmentConfig::default();
        assert!(config.stores.is_empty());
        assert_eq!(config.search_batch_size, 100);
        assert!(config.eligible_kinds("Order").is_empty());
    }

    #[test]
    fn builder_pattern() {
        let config = EnvironmentConfig::new()
            .store(
                "orders-db",
                StoreKind::Relational,
                ConnectionConfig::new("memory:orders"),
            )
            .map("Order", [StoreKind::Relational])
            .search_batch_size(10);

        assert_eq!(config.stores[0].name, "orders-db");
        assert_eq!(config.eligible_kinds("Order"), [StoreKind::Relational]);
        assert_eq!(config.search_batch_size, 10);
    }

    #[test]
    fn parses_json() {
        let config = EnvironmentConfig::from_json_str(
            r#"{
                "stores": [
                    {"name": "orders-db", "kind": "relational",
                     "connection": {"location": "memory:orders", "pool_size": 2}},
                    {"name": "items-search", "kind": "search_index",
                     "connection": {"location": "cluster-a", "pool_policy": "fail_fast"}}
                ],
                "mappings": {"Order": ["relational"], "Item": ["search_index"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.stores[0].connection.pool_size, 2);
        assert_eq!(config.stores[1].connection.pool_policy, PoolPolicy::FailFast);
        assert_eq!(config.eligible_kinds("Item"), [StoreKind::SearchIndex]);
        assert_eq!(config.search_batch_size, 100);
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let err = EnvironmentConfig::from_json_str("{\"stores\": 3}").unwrap_err();
        assert!(matches!(err, CoreError::Configuration { .. }));
    }
}
