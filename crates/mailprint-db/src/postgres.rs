use std::error::Error as StdError;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use mailprint_common::{Error, Result};
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client, NoTls};
use tracing::{debug, info};

use crate::database::{Backend, ColumnInfo, Database, Row, Value, text};

type BoxError = Box<dyn StdError + Sync + Send>;

/// PostgreSQL driver backed by the synchronous `postgres` client.
///
/// Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` so they can
/// span calls the way the [`Database`] trait expects.
pub struct PostgresDatabase {
    client: Client,
    in_transaction: bool,
}

impl PostgresDatabase {
    /// Connect with a libpq-style string, e.g.
    /// `host=localhost user=postgres dbname=mailprint` or a `postgres://` URL.
    pub fn connect(params: &str) -> Result<Self> {
        info!("connecting to postgres");
        let client = Client::connect(params, NoTls)
            .map_err(|e| Error::Database(format!("failed to connect to postgres: {e}")))?;
        Ok(Self {
            client,
            in_transaction: false,
        })
    }

    /// Borrow the underlying client.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    fn simple(&mut self, sql: &str, what: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .map_err(|e| Error::Database(format!("failed to {what}: {e}")))
    }
}

impl Database for PostgresDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let sql = normalize_placeholders(sql);
        let changed = self
            .client
            .execute(sql.as_str(), &bind(params))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(changed as usize)
    }

    fn execute_many(&mut self, sql: &str, params: &[Vec<Value>]) -> Result<usize> {
        let sql = normalize_placeholders(sql);
        let stmt = self
            .client
            .prepare(&sql)
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut changed = 0;
        for set in params {
            changed += self
                .client
                .execute(&stmt, &bind(set))
                .map_err(|e| Error::Database(e.to_string()))? as usize;
        }
        Ok(changed)
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = normalize_placeholders(sql);
        let rows = self
            .client
            .query(sql.as_str(), &bind(params))
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Row::new();
            for (idx, column) in row.columns().iter().enumerate() {
                let value = read_column(row, idx).map_err(|e| {
                    Error::Database(format!("failed to read column {}: {e}", column.name()))
                })?;
                record.insert(column.name().to_string(), value);
            }
            out.push(record);
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        debug!("BEGIN");
        self.simple("BEGIN", "begin transaction")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        debug!("COMMIT");
        let outcome = self.simple("COMMIT", "commit");
        // A failed COMMIT still ends the transaction on the server.
        self.in_transaction = false;
        outcome
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        debug!("ROLLBACK");
        self.in_transaction = false;
        self.simple("ROLLBACK", "roll back")
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT 1 AS hit FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = %s",
            &[table.into()],
        )?;
        Ok(!rows.is_empty())
    }

    fn index_exists(&mut self, index: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT 1 AS hit FROM pg_indexes
             WHERE schemaname = current_schema() AND indexname = %s",
            &[index.into()],
        )?;
        Ok(!rows.is_empty())
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.query(
            "SELECT column_name::text AS name,
                    data_type::text AS declared_type,
                    (is_nullable = 'NO') AS not_null,
                    column_default::text AS dflt_value
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = %s
             ORDER BY ordinal_position",
            &[table.into()],
        )?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnInfo {
                name: text(row.get("name")),
                declared_type: text(row.get("declared_type")),
                not_null: row.get("not_null").and_then(Value::as_i64) == Some(1),
                default: row.get("dflt_value").and_then(Value::as_str).map(str::to_string),
            })
            .collect())
    }

    fn table_definitions(&mut self) -> Result<Vec<String>> {
        let tables = self.query(
            "SELECT table_name::text AS name FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[],
        )?;

        let mut out = Vec::with_capacity(tables.len());
        for row in &tables {
            let table = text(row.get("name"));
            let columns: Vec<String> = self
                .table_columns(&table)?
                .into_iter()
                .map(|c| {
                    let mut line = format!("    {} {}", c.name, c.declared_type);
                    if c.not_null {
                        line.push_str(" NOT NULL");
                    }
                    if let Some(default) = c.default {
                        line.push_str(" DEFAULT ");
                        line.push_str(&default);
                    }
                    line
                })
                .collect();
            out.push(format!("CREATE TABLE {table} (\n{}\n)", columns.join(",\n")));
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .map_err(|e| Error::Database(format!("failed to close connection: {e}")))
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Rewrite `%s`, `?` and `?N` placeholders to PostgreSQL's `$N`. Text inside
/// single-quoted literals is left alone.
fn normalize_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut next = 0;
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '%' if chars.peek() == Some(&'s') => {
                chars.next();
                next += 1;
                out.push_str(&format!("${next}"));
            }
            '?' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                if digits.is_empty() {
                    next += 1;
                    out.push_str(&format!("${next}"));
                } else {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(i) => integer_to_sql(*i, ty, out),
            Value::Real(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Blob(b) => b.as_slice().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn integer_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::BOOL {
        (i != 0).to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (i as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (i as f64).to_sql(ty, out)
    } else {
        i.to_sql(ty, out)
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if *ty == Type::TIMESTAMPTZ {
        DateTime::parse_from_rfc3339(s)?
            .with_timezone(&Utc)
            .to_sql(ty, out)
    } else if *ty == Type::TIMESTAMP {
        parse_naive(s)?.to_sql(ty, out)
    } else {
        s.to_sql(ty, out)
    }
}

fn parse_naive(s: &str) -> std::result::Result<NaiveDateTime, BoxError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")?)
}

/// Map a column to the driver-neutral [`Value`]. Timestamps come back as
/// RFC 3339 text so callers see the same shape as on SQLite.
fn read_column(row: &postgres::Row, idx: usize) -> std::result::Result<Value, postgres::Error> {
    let ty = row.columns()[idx].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?
            .map(|b| Value::Integer(i64::from(b)))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|i| Value::Integer(i64::from(i)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|i| Value::Integer(i64::from(i)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|f| Value::Real(f64::from(f)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Value::Real)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Blob)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| Value::Text(dt.to_rfc3339_opts(SecondsFormat::Micros, true)))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?.map(|dt| {
            Value::Text(dt.and_utc().to_rfc3339_opts(SecondsFormat::Micros, true))
        })
    } else {
        row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}
