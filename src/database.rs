// MIT License - Copyright (c) 2026 Peter Wright
// Persistence port

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use tracing::debug;

use crate::error::{PlcError, Result};

/// Schema created by [`SqliteDatabase`] when a store is opened.
pub const SOCKET_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS socket (name TEXT PRIMARY KEY NOT NULL, status INTEGER NOT NULL DEFAULT 0)";

/// A column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(i) => Some(*i != 0),
            Value::Text(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Int(i) => Ok(ToSqlOutput::from(*i)),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

/// A `column=value` equality, used both as SET and as WHERE clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub value: Value,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Int(i) => write!(f, "{}={}", self.column, i),
            Value::Text(s) => write!(f, "{}=\"{}\"", self.column, s),
        }
    }
}

/// Durable key/value row store.
pub trait Database: Send + Sync {
    /// Open a handle on the given store.
    fn open(&self, store: &str) -> Result<Box<dyn Connection>>;
}

/// An open handle on a store. Not shared between threads.
pub trait Connection: Send {
    /// Update rows matching `filter`. Returns the number of rows changed.
    fn update(&mut self, table: &str, set: &Assignment, filter: &Assignment) -> Result<usize>;

    /// Insert one row.
    fn insert(&mut self, table: &str, row: &[Assignment]) -> Result<()>;

    /// Read one column of the first row matching `filter`.
    fn select(&mut self, table: &str, column: &str, filter: &Assignment) -> Result<Option<Value>>;

    /// Release the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

fn check_ident(ident: &str) -> Result<&str> {
    if !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(ident)
    } else {
        Err(PlcError::Persistence(format!("invalid identifier {:?}", ident)))
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite-backed store; the store id is the database file path.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    schema: String,
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::with_schema(SOCKET_SCHEMA)
    }
}

impl SqliteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom schema batch, executed on every open.
    pub fn with_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }
}

impl Database for SqliteDatabase {
    fn open(&self, store: &str) -> Result<Box<dyn Connection>> {
        debug!("Opening SQLite store {}", store);
        let conn = rusqlite::Connection::open(store)?;
        conn.execute_batch(&self.schema)?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn update(&mut self, table: &str, set: &Assignment, filter: &Assignment) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            check_ident(table)?,
            check_ident(&set.column)?,
            check_ident(&filter.column)?
        );
        let changed = self
            .conn
            .execute(&sql, rusqlite::params![set.value, filter.value])?;
        Ok(changed)
    }

    fn insert(&mut self, table: &str, row: &[Assignment]) -> Result<()> {
        let columns = row
            .iter()
            .map(|a| check_ident(&a.column))
            .collect::<Result<Vec<_>>>()?;
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            check_ident(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<&dyn rusqlite::ToSql> =
            row.iter().map(|a| &a.value as &dyn rusqlite::ToSql).collect();
        self.conn.execute(&sql, values.as_slice())?;
        Ok(())
    }

    fn select(&mut self, table: &str, column: &str, filter: &Assignment) -> Result<Option<Value>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            check_ident(column)?,
            check_ident(table)?,
            check_ident(&filter.column)?
        );
        let value = self
            .conn
            .query_row(&sql, rusqlite::params![filter.value], |row| {
                row.get::<_, SqlValue>(0)
            })
            .optional()?;
        match value {
            None => Ok(None),
            Some(SqlValue::Integer(i)) => Ok(Some(Value::Int(i))),
            Some(SqlValue::Text(s)) => Ok(Some(Value::Text(s))),
            Some(other) => Err(PlcError::Persistence(format!(
                "unsupported column type for {}: {:?}",
                column, other
            ))),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| PlcError::Persistence(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

type Row = HashMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryInner {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    opens: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    fail_open: AtomicBool,
    fail_update: AtomicBool,
    update_delay_ms: AtomicUsize,
}

/// In-memory store with instrumentation, used for dry runs and tests.
///
/// All store ids share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<MemoryInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing the port.
    pub fn seed(&self, table: &str, row: &[Assignment]) {
        let row = row
            .iter()
            .map(|a| (a.column.clone(), a.value.clone()))
            .collect();
        self.inner
            .tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Read a column of the first row matching `filter`, bypassing the port.
    pub fn get(&self, table: &str, column: &str, filter: &Assignment) -> Option<Value> {
        let tables = self.inner.tables.lock();
        tables
            .get(table)?
            .iter()
            .find(|row| row.get(&filter.column) == Some(&filter.value))
            .and_then(|row| row.get(column).cloned())
    }

    /// Total number of successful opens.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Highest number of handles that were open at the same time.
    pub fn max_concurrent_opens(&self) -> usize {
        self.inner.max_open.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update(&self, fail: bool) {
        self.inner.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Make every update block for the given time.
    pub fn update_delay(&self, delay: Duration) {
        self.inner
            .update_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

impl Database for MemoryDatabase {
    fn open(&self, _store: &str) -> Result<Box<dyn Connection>> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(PlcError::Persistence("simulated open failure".to_string()));
        }
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            inner: self.inner.clone(),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<MemoryInner>,
}

impl Connection for MemoryConnection {
    fn update(&mut self, table: &str, set: &Assignment, filter: &Assignment) -> Result<usize> {
        let delay = self.inner.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        if self.inner.fail_update.load(Ordering::SeqCst) {
            return Err(PlcError::Persistence("simulated update failure".to_string()));
        }
        let mut tables = self.inner.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        let mut changed = 0;
        for row in rows
            .iter_mut()
            .filter(|row| row.get(&filter.column) == Some(&filter.value))
        {
            row.insert(set.column.clone(), set.value.clone());
            changed += 1;
        }
        Ok(changed)
    }

    fn insert(&mut self, table: &str, row: &[Assignment]) -> Result<()> {
        let row = row
            .iter()
            .map(|a| (a.column.clone(), a.value.clone()))
            .collect();
        self.inner
            .tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    fn select(&mut self, table: &str, column: &str, filter: &Assignment) -> Result<Option<Value>> {
        let tables = self.inner.tables.lock();
        Ok(tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| row.get(&filter.column) == Some(&filter.value))
                .and_then(|row| row.get(column).cloned())
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.inner.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_display() {
        assert_eq!(Assignment::new("status", true).to_string(), "status=1");
        assert_eq!(Assignment::new("name", "porch").to_string(), "name=\"porch\"");
    }

    #[test]
    fn test_sqlite_update_and_select() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socket.db");
        let store = path.to_str().unwrap();
        let db = SqliteDatabase::new();

        let mut conn = db.open(store).unwrap();
        let key = Assignment::new("name", "porch");
        assert_eq!(conn.select("socket", "status", &key).unwrap(), None);
        assert_eq!(
            conn.update("socket", &Assignment::new("status", true), &key).unwrap(),
            0
        );
        conn.insert("socket", &[key.clone(), Assignment::new("status", false)])
            .unwrap();
        assert_eq!(
            conn.update("socket", &Assignment::new("status", true), &key).unwrap(),
            1
        );
        conn.close().unwrap();

        let mut conn = db.open(store).unwrap();
        let value = conn.select("socket", "status", &key).unwrap();
        assert_eq!(value.and_then(|v| v.as_bool()), Some(true));
        conn.close().unwrap();
    }

    #[test]
    fn test_sqlite_rejects_bad_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socket.db");
        let db = SqliteDatabase::new();
        let mut conn = db.open(path.to_str().unwrap()).unwrap();
        let err = conn
            .update(
                "socket; DROP TABLE socket",
                &Assignment::new("status", true),
                &Assignment::new("name", "x"),
            )
            .unwrap_err();
        assert!(matches!(err, PlcError::Persistence(_)));
    }

    #[test]
    fn test_memory_database_tracks_handles() {
        let db = MemoryDatabase::new();
        db.seed(
            "socket",
            &[Assignment::new("name", "porch"), Assignment::new("status", false)],
        );

        let a = db.open("socket.db").unwrap();
        let b = db.open("socket.db").unwrap();
        assert_eq!(db.max_concurrent_opens(), 2);
        drop(a);
        b.close().unwrap();

        let mut c = db.open("socket.db").unwrap();
        let key = Assignment::new("name", "porch");
        c.update("socket", &Assignment::new("status", true), &key).unwrap();
        assert_eq!(db.get("socket", "status", &key), Some(Value::Int(1)));
        assert_eq!(db.open_count(), 3);
        assert_eq!(db.max_concurrent_opens(), 2);
    }

    #[test]
    fn test_memory_database_failures() {
        let db = MemoryDatabase::new();
        db.fail_open(true);
        assert!(db.open("x").is_err());
        db.fail_open(false);
        db.fail_update(true);
        let mut conn = db.open("x").unwrap();
        assert!(
            conn.update(
                "socket",
                &Assignment::new("status", true),
                &Assignment::new("name", "x")
            )
            .is_err()
        );
    }
}
