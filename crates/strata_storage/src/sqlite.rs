//! Relational driver backed by SQLite.
//!
//! Locations of the form `memory:<name>` open a named in-memory database
//! shared by every connection of the driver; any other location is a
//! database file path. Tables are created untyped, one column per field,
//! with the key fields as the primary key.
//!
//! In-memory databases live in the `memdb` VFS rather than a shared cache,
//! so a transaction blocked by another connection's write transaction
//! waits up to the busy timeout (`busy_timeout_ms`, 5 s by default) instead of
//! failing at once.

use crate::config::ConnectionConfig;
use crate::connection::{Driver, NativeConnection};
use crate::error::{StorageError, StorageResult};
use crate::kind::StoreKind;
use crate::layout::CollectionLayout;
use crate::query::{format_key, quote_identifier, NativeQuery, RowKey};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use std::collections::HashMap;
use std::time::Duration;
use strata_codec::{Row, Value};
use tracing::{debug, trace};

const MEMORY_PREFIX: &str = "memory:";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens SQLite connections.
///
/// For `memory:` locations the driver keeps one idle connection open so
/// the database outlives pooled connections being closed and reopened.
#[derive(Debug, Default)]
pub struct SqliteDriver {
    keepers: Mutex<HashMap<String, Connection>>,
}

impl SqliteDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, location: &str) -> StorageResult<Connection> {
        if let Some(name) = location.strip_prefix(MEMORY_PREFIX) {
            if name.is_empty() {
                return Err(StorageError::InvalidConfig(
                    "memory database needs a name".into(),
                ));
            }
            let uri = format!("file:/{name}?vfs=memdb");
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let mut keepers = self.keepers.lock();
            if !keepers.contains_key(location) {
                let keeper = Connection::open_with_flags(&uri, flags)?;
                keepers.insert(location.to_string(), keeper);
            }
            return Ok(Connection::open_with_flags(&uri, flags)?);
        }
        if location.trim().is_empty() {
            return Err(StorageError::InvalidConfig("location must not be empty".into()));
        }
        Ok(Connection::open(location)?)
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Box<dyn NativeConnection>> {
        let conn = self.open(&config.location)?;
        let timeout = match config.options.get("busy_timeout_ms") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                StorageError::InvalidConfig(format!("busy_timeout_ms is not a number: {raw}"))
            })?),
            None => DEFAULT_BUSY_TIMEOUT,
        };
        conn.busy_timeout(timeout)?;
        debug!(location = %config.location, "opened sqlite connection");
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

/// One SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Option<Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> StorageResult<&Connection> {
        self.conn.as_ref().ok_or(StorageError::Closed)
    }

    fn select(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let params = to_sql_params(params)?;
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.clone(), from_sql(row.get_ref(i)?, column)?);
            }
            out.push(record);
        }
        Ok(out)
    }
}

fn where_key(key: &RowKey, first_param: usize) -> String {
    key.iter()
        .enumerate()
        .map(|(i, (field, _))| format!("{} = ?{}", quote_identifier(field), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_values(key: &RowKey) -> impl Iterator<Item = &Value> {
    key.iter().map(|(_, v)| v)
}

fn to_sql(value: &Value) -> StorageResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Array(_) | Value::Map(_) => {
            return Err(StorageError::Unsupported(
                "nested values cannot be stored in a relational column".into(),
            ))
        }
    })
}

fn to_sql_params<'a>(values: impl IntoIterator<Item = &'a Value>) -> StorageResult<Vec<SqlValue>> {
    values.into_iter().map(to_sql).collect()
}

fn from_sql(value: ValueRef<'_>, column: &str) -> StorageResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|_| StorageError::Unsupported(format!("column {column} is not UTF-8")))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
        ValueRef::Real(_) => {
            return Err(StorageError::Unsupported(format!(
                "column {column} holds a floating-point value"
            )))
        }
    })
}

fn duplicate_or(err: rusqlite::Error, collection: &str, key: &RowKey) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StorageError::DuplicateKey {
                collection: collection.to_string(),
                key: format_key(key),
            }
        }
        _ => StorageError::Sqlite(err),
    }
}

impl NativeConnection for SqliteConnection {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn ensure_collection(&mut self, layout: &CollectionLayout) -> StorageResult<()> {
        let mut columns: Vec<String> = layout
            .fields
            .iter()
            .map(|f| quote_identifier(&f.name))
            .collect();
        for key in &layout.key_fields {
            let quoted = quote_identifier(key);
            if !columns.contains(&quoted) {
                columns.push(quoted);
            }
        }
        let primary: Vec<String> = layout.key_fields.iter().map(|k| quote_identifier(k)).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            quote_identifier(&layout.name),
            columns.join(", "),
            primary.join(", ")
        );
        trace!(%sql, "provision table");
        self.conn()?.execute_batch(&sql)?;
        Ok(())
    }

    fn begin(&mut self) -> StorageResult<()> {
        if self.in_transaction() {
            return Err(StorageError::transaction_state("transaction already open"));
        }
        // Writers queue on the busy timeout here rather than failing on a
        // lock upgrade mid-transaction.
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        if !self.in_transaction() {
            return Err(StorageError::transaction_state("no open transaction"));
        }
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        if !self.in_transaction() {
            return Err(StorageError::transaction_state("no open transaction"));
        }
        self.conn()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    fn insert(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        let columns: Vec<String> = row.keys().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(collection),
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = to_sql_params(row.values())?;
        trace!(%sql, "insert");
        self.conn()?
            .execute(&sql, params_from_iter(params))
            .map_err(|e| duplicate_or(e, collection, key))?;
        Ok(())
    }

    fn update(&mut self, collection: &str, key: &RowKey, row: &Row) -> StorageResult<()> {
        let assignments: Vec<String> = row
            .keys()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_identifier(c), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_identifier(collection),
            assignments.join(", "),
            where_key(key, row.len() + 1)
        );
        let params = to_sql_params(row.values().chain(key_values(key)))?;
        trace!(%sql, "update");
        let changed = self
            .conn()?
            .execute(&sql, params_from_iter(params))
            .map_err(|e| duplicate_or(e, collection, key))?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                collection: collection.to_string(),
                key: format_key(key),
            });
        }
        Ok(())
    }

    fn delete(&mut self, collection: &str, key: &RowKey) -> StorageResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(collection),
            where_key(key, 1)
        );
        let params = to_sql_params(key_values(key))?;
        trace!(%sql, "delete");
        let changed = self.conn()?.execute(&sql, params_from_iter(params))?;
        Ok(changed > 0)
    }

    fn get(&mut self, collection: &str, key: &RowKey) -> StorageResult<Option<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_identifier(collection),
            where_key(key, 1)
        );
        let params: Vec<Value> = key_values(key).cloned().collect();
        Ok(self.select(&sql, &params)?.into_iter().next())
    }

    fn query(&mut self, query: &NativeQuery) -> StorageResult<Vec<Row>> {
        let NativeQuery::Sql(stmt) = query else {
            return Err(StorageError::unsupported_query(
                StoreKind::Relational,
                query.to_string(),
            ));
        };
        trace!(sql = %stmt.sql, params = stmt.params.len(), "query");
        self.select(&stmt.sql, &stmt.params)
    }

    fn is_valid(&mut self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
    }

    fn close(&mut self) -> StorageResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldLayout;
    use crate::query::SqlStatement;

    fn orders() -> CollectionLayout {
        CollectionLayout {
            name: "orders".into(),
            key_fields: vec!["orderId".into()],
            fields: ["orderId", "customer", "total"]
                .into_iter()
                .map(|name| FieldLayout {
                    name: name.into(),
                    analyzer: None,
                })
                .collect(),
        }
    }

    fn order(id: i64, customer: &str, total: i64) -> (RowKey, Row) {
        let key = vec![("orderId".to_string(), Value::Integer(id))];
        let mut row = Row::new();
        row.insert("orderId".into(), Value::Integer(id));
        row.insert("customer".into(), Value::from(customer));
        row.insert("total".into(), Value::Integer(total));
        (key, row)
    }

    fn memory_location() -> String {
        format!("memory:{}", uuid::Uuid::new_v4())
    }

    fn connect(driver: &SqliteDriver, location: &str) -> Box<dyn NativeConnection> {
        let mut conn = driver.connect(&ConnectionConfig::new(location)).unwrap();
        conn.ensure_collection(&orders()).unwrap();
        conn
    }

    #[test]
    fn crud_round_trip() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        let (key, row) = order(1, "ada", 30);

        conn.insert("orders", &key, &row).unwrap();
        assert_eq!(conn.get("orders", &key).unwrap(), Some(row.clone()));

        let (_, changed) = order(1, "ada", 45);
        conn.update("orders", &key, &changed).unwrap();
        assert_eq!(
            conn.get("orders", &key).unwrap().unwrap()["total"],
            Value::Integer(45)
        );

        assert!(conn.delete("orders", &key).unwrap());
        assert!(!conn.delete("orders", &key).unwrap());
        assert!(conn.get("orders", &key).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_reported() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        let (key, row) = order(1, "ada", 30);
        conn.insert("orders", &key, &row).unwrap();
        assert!(conn.insert("orders", &key, &row).unwrap_err().is_duplicate_key());
    }

    #[test]
    fn update_of_missing_row_fails() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        let (key, row) = order(9, "bob", 1);
        assert!(matches!(
            conn.update("orders", &key, &row),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn memory_database_is_shared_between_connections() {
        let driver = SqliteDriver::new();
        let location = memory_location();
        let mut a = connect(&driver, &location);
        let (key, row) = order(1, "ada", 30);
        a.insert("orders", &key, &row).unwrap();
        a.close().unwrap();

        let mut b = connect(&driver, &location);
        assert_eq!(b.get("orders", &key).unwrap(), Some(row));
    }

    #[test]
    fn second_writer_waits_for_the_first() {
        let driver = SqliteDriver::new();
        let location = memory_location();
        let mut first = connect(&driver, &location);
        let mut second = connect(&driver, &location);

        first.begin().unwrap();
        let (key, row) = order(1, "ada", 30);
        first.insert("orders", &key, &row).unwrap();

        let writer = std::thread::spawn(move || {
            second.begin().unwrap();
            let (key, row) = order(2, "bob", 70);
            second.insert("orders", &key, &row)?;
            second.commit()?;
            Ok::<_, StorageError>(second)
        });
        std::thread::sleep(Duration::from_millis(100));
        first.commit().unwrap();

        let mut second = writer.join().unwrap().unwrap();
        let all = NativeQuery::Sql(SqlStatement::new("SELECT * FROM \"orders\"", vec![]));
        assert_eq!(second.query(&all).unwrap().len(), 2);
    }

    #[test]
    fn busy_timeout_must_be_numeric() {
        let driver = SqliteDriver::new();
        let config = ConnectionConfig::new(memory_location()).option("busy_timeout_ms", "soon");
        assert!(matches!(
            driver.connect(&config),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rollback_discards_writes() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        let (key, row) = order(1, "ada", 30);

        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.insert("orders", &key, &row).unwrap();
        conn.rollback().unwrap();

        assert!(!conn.in_transaction());
        assert!(conn.get("orders", &key).unwrap().is_none());
        assert!(conn.rollback().is_err());
    }

    #[test]
    fn parameterized_queries() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        for (id, customer, total) in [(1, "ada", 30), (2, "bob", 70), (3, "ada", 90)] {
            let (key, row) = order(id, customer, total);
            conn.insert("orders", &key, &row).unwrap();
        }

        let stmt = SqlStatement::new(
            "SELECT * FROM \"orders\" WHERE \"customer\" = ?1 AND \"total\" >= ?2",
            vec![Value::from("ada"), Value::Integer(50)],
        );
        let rows = conn.query(&NativeQuery::Sql(stmt)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["orderId"], Value::Integer(3));
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        let location = path.to_string_lossy().to_string();
        let (key, row) = order(1, "ada", 30);
        {
            let driver = SqliteDriver::new();
            let mut conn = connect(&driver, &location);
            conn.insert("orders", &key, &row).unwrap();
            conn.close().unwrap();
        }
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &location);
        assert_eq!(conn.get("orders", &key).unwrap(), Some(row));
    }

    #[test]
    fn nested_values_are_rejected() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        let (key, mut row) = order(1, "ada", 30);
        row.insert("customer".into(), Value::Array(vec![]));
        assert!(matches!(
            conn.insert("orders", &key, &row),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn closed_connection_is_invalid() {
        let driver = SqliteDriver::new();
        let mut conn = connect(&driver, &memory_location());
        assert!(conn.is_valid());
        conn.close().unwrap();
        assert!(!conn.is_valid());
        assert!(matches!(
            conn.get("orders", &vec![("orderId".to_string(), Value::Integer(1))]),
            Err(StorageError::Closed)
        ));
    }
}
