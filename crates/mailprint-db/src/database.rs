use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use mailprint_common::{Error, Result};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use serde::Serialize;
use tracing::{debug, info};

/// A single SQL value, independent of the driver that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b.as_slice()),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// One result row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Which SQL engine sits behind a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column as the backend's catalog reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    /// Default expression as the catalog stores it, e.g. `'email'` on SQLite
    /// or `'email'::text` on PostgreSQL.
    pub default: Option<String>,
}

/// The capability the migration runner and schema helpers need from a
/// connection. Callers own the connection and lend it out for each call.
///
/// Statements may use `%s`, `?` or `?N` placeholders; each driver rewrites
/// them to its native form so the same statement text works on every backend.
pub trait Database {
    fn backend(&self) -> Backend;

    /// Run a single statement, returning the number of rows changed.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run the same statement once per parameter set.
    fn execute_many(&mut self, sql: &str, params: &[Vec<Value>]) -> Result<usize> {
        let mut changed = 0;
        for set in params {
            changed += self.execute(sql, set)?;
        }
        Ok(changed)
    }

    /// Run a multi-statement script with no parameters.
    fn execute_script(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction. A no-op when none is open.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction. A no-op when none is open.
    fn rollback(&mut self) -> Result<()>;

    fn table_exists(&mut self, table: &str) -> Result<bool>;

    fn index_exists(&mut self, index: &str) -> Result<bool>;

    /// Columns of `table` in declaration order; empty if it does not exist.
    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// `CREATE TABLE` statement for every user table, ordered by name.
    fn table_definitions(&mut self) -> Result<Vec<String>>;

    /// Release the connection, reporting any error the driver raises on close.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// SQLite driver backed by rusqlite.
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        Ok(Self { conn })
    }

    /// Borrow the underlying rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))
    }
}

impl Database for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let sql = normalize_placeholders(sql);
        self.conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn execute_many(&mut self, sql: &str, params: &[Vec<Value>]) -> Result<usize> {
        let sql = normalize_placeholders(sql);
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut changed = 0;
        for set in params {
            changed += stmt
                .execute(params_from_iter(set.iter()))
                .map_err(|e| Error::Database(e.to_string()))?;
        }
        Ok(changed)
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = normalize_placeholders(sql);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
        {
            let mut record = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| Error::Database(format!("failed to read column {name}: {e}")))?;
                record.insert(name.clone(), Value::from(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        debug!("BEGIN");
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
    }

    fn commit(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        debug!("COMMIT");
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        debug!("ROLLBACK");
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.sqlite_master_has("table", table)
    }

    fn index_exists(&mut self, index: &str) -> Result<bool> {
        self.sqlite_master_has("index", index)
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.query(
            "SELECT name, type, \"notnull\" AS not_null, dflt_value FROM pragma_table_info(?1) ORDER BY cid",
            &[table.into()],
        )?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnInfo {
                name: text(row.get("name")),
                declared_type: text(row.get("type")),
                not_null: row.get("not_null").and_then(Value::as_i64) == Some(1),
                default: row.get("dflt_value").and_then(Value::as_str).map(str::to_string),
            })
            .collect())
    }

    fn table_definitions(&mut self) -> Result<Vec<String>> {
        let rows = self.query(
            "SELECT sql FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
             ORDER BY name",
            &[],
        )?;
        Ok(rows.iter().map(|row| text(row.get("sql"))).collect())
    }

    fn close(self: Box<Self>) -> Result<()> {
        SqliteDatabase::close(*self)
    }
}

impl SqliteDatabase {
    fn sqlite_master_has(&mut self, kind: &str, name: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT 1 AS hit FROM sqlite_master WHERE type = ?1 AND name = ?2",
            &[kind.into(), name.into()],
        )?;
        Ok(!rows.is_empty())
    }
}

pub(crate) fn text(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

/// Rewrite `%s` placeholders to SQLite's positional `?`.
fn normalize_placeholders(sql: &str) -> Cow<'_, str> {
    if sql.contains("%s") {
        Cow::Owned(sql.replace("%s", "?"))
    } else {
        Cow::Borrowed(sql)
    }
}
