//! Search index driver.
//!
//! Documents are kept per index and matched against a [`FilterNode`]
//! tree, applying each field's [`Analyzer`](crate::Analyzer) from the
//! index mapping. Results come back in document-key order.

use crate::config::ConnectionConfig;
use crate::connection::{Driver, NativeConnection};
use crate::error::{StorageError, StorageResult};
use crate::kind::StoreKind;
use crate::layout::CollectionLayout;
use crate::memory::{MemoryConnection, Namespaces};
use crate::query::{FilterNode, NativeQuery, RowKey};
use strata_codec::Row;
use tracing::{debug, trace};

/// Opens connections to in-process search clusters.
#[derive(Debug, Default)]
pub struct SearchIndexDriver {
    clusters: Namespaces<Row>,
}

impl SearchIndexDriver {
    /// Creates a driver with no clusters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for SearchIndexDriver {
    fn kind(&self) -> StoreKind {
        StoreKind::SearchIndex
    }

    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Box<dyn NativeConnection>> {
        let catalog = self.clusters.open(&config.location)?;
        debug!(cluster = %config.location, "opened search index connection");
        Ok(Box::new(SearchConnection {
            inner: MemoryConnection::new(StoreKind::SearchIndex, catalog),
        }))
    }
}

/// A connection to one search cluster.
#[derive(Debug)]
pub struct SearchConnection {
    inner: MemoryConnection<Row>,
}

impl SearchConnection {
    fn search(&self, index: &str, filter: &FilterNode) -> StorageResult<Vec<Row>> {
        let (layout, docs) = self.inner.scan(index, &[])?;
        Ok(docs
            .into_iter()
            .filter(|doc| filter.matches(doc, Some(&layout)))
            .collect())
    }
}

impl NativeConnection for SearchConnection {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()> {
        self.inner.ensure_collection(layout)
    }

    fn begin(&mut self) -> StorageResult<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.inner.insert(collection, key, row)
    }

    fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        self.inner.update(collection, key, row)
    }

    fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        self.inner.delete(collection, key)
    }

    fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        self.inner.get(collection, key)
    }

    fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>> {
        let NativeQuery::Search(request) = query else {
            return Err(StorageError::unsupported_query(
                StoreKind::SearchIndex,
                query.to_string(),
            ));
        };
        trace!(body = %request.to_json(), index = %request.index, "search");
        let hits = self.search(&request.index, &request.filter)?;
        Ok(request.page.apply(hits))
    }

    fn is_valid(&mut self) -> bool {
        self.inner.is_valid()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Analyzer, FieldLayout};
    use crate::query::{Page, SearchRequest};
    use strata_codec::Value;

    fn mapping() -> CollectionLayout {
        CollectionLayout {
            name: "products".into(),
            key_fields: vec!["sku".into()],
            fields: vec![
                FieldLayout {
                    name: "sku".into(),
                    analyzer: Some(Analyzer::Keyword),
                },
                FieldLayout {
                    name: "title".into(),
                    analyzer: Some(Analyzer::Standard),
                },
            ],
        }
    }

    fn product(sku: &str, title: &str) -> (RowKey, Row) {
        let key = vec![("sku".to_string(), Value::from(sku))];
        let mut row = Row::new();
        row.insert("sku".into(), Value::from(sku));
        row.insert("title".into(), Value::from(title));
        (key, row)
    }

    fn connection(cluster: &str) -> Box<dyn NativeConnection> {
        let driver = SearchIndexDriver::new();
        let mut conn = driver.connect(&ConnectionConfig::new(cluster)).unwrap();
        conn.ensure_collection(&mapping()).unwrap();
        for (sku, title) in [("B-2", "Red Wine"), ("A-1", "White Wine"), ("C-3", "Red Apple")] {
            let (key, row) = product(sku, title);
            conn.insert("products", &key, &row).unwrap();
        }
        conn
    }

    fn request(filter: FilterNode, page: Page) -> NativeQuery {
        NativeQuery::Search(SearchRequest {
            index: "products".into(),
            filter,
            page,
        })
    }

    #[test]
    fn analyzed_terms_match_tokens() {
        let mut conn = connection("cluster-tokens");
        let hits = conn
            .query(&request(
                FilterNode::Term {
                    field: "title".into(),
                    value: Value::from("wine"),
                },
                Page::default(),
            ))
            .unwrap();
        let skus: Vec<_> = hits.iter().map(|h| h["sku"].clone()).collect();
        assert_eq!(skus, vec![Value::from("A-1"), Value::from("B-2")]);
    }

    #[test]
    fn keyword_fields_match_exactly() {
        let mut conn = connection("cluster-keyword");
        let hits = conn
            .query(&request(
                FilterNode::Terms {
                    field: "sku".into(),
                    values: vec![Value::from("a-1"), Value::from("C-3")],
                },
                Page::default(),
            ))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["sku"], Value::from("C-3"));
    }

    #[test]
    fn page_window_applies_after_filter() {
        let mut conn = connection("cluster-page");
        let hits = conn
            .query(&request(FilterNode::MatchAll, Page::new(1, 1)))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["sku"], Value::from("B-2"));
    }

    #[test]
    fn staged_documents_are_searchable_in_transaction() {
        let mut conn = connection("cluster-staged");
        conn.begin().unwrap();
        let (key, row) = product("D-4", "Red Grape");
        conn.insert("products", &key, &row).unwrap();
        let red = FilterNode::Term {
            field: "title".into(),
            value: Value::from("red"),
        };
        assert_eq!(
            conn.query(&request(red.clone(), Page::default())).unwrap().len(),
            3
        );
        conn.rollback().unwrap();
        assert_eq!(conn.query(&request(red, Page::default())).unwrap().len(), 2);
    }
}
