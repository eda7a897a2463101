use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use mailprint_common::{Error, Result};
use serde::Serialize;

use crate::database::{Database, Row, Value};
use crate::identifier::{MigrationId, SqlIdent};

pub const SCHEMA_LEDGER_TABLE: &str = "schema_migrations";
pub const DATA_LEDGER_TABLE: &str = "data_migrations";

/// A migration that has been applied and committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationRecord {
    pub identifier: MigrationId,
    pub applied_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// Append-only table of applied migrations. Rows are inserted once and never
/// updated or deleted.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: SqlIdent,
}

impl Ledger {
    pub fn new(table: SqlIdent) -> Self {
        Self { table }
    }

    /// Ledger for file-based schema migrations.
    pub fn schema() -> Self {
        Self::named(SCHEMA_LEDGER_TABLE)
    }

    /// Ledger for code-defined data migrations.
    pub fn data() -> Self {
        Self::named(DATA_LEDGER_TABLE)
    }

    fn named(table: &'static str) -> Self {
        Self {
            table: SqlIdent::from_static(table),
        }
    }

    pub fn table(&self) -> &SqlIdent {
        &self.table
    }

    /// Create the ledger table if it does not exist.
    pub fn ensure(&self, db: &mut dyn Database) -> Result<()> {
        db.execute_script(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                identifier TEXT PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL,
                description TEXT
            );",
            self.table
        ))
        .map_err(|e| Error::Ledger(format!("failed to create {}: {e}", self.table)))
    }

    /// Applied migrations, oldest first.
    pub fn records(&self, db: &mut dyn Database) -> Result<Vec<MigrationRecord>> {
        let rows = db
            .query(
                &format!(
                    "SELECT identifier, applied_at, description FROM {}
                     ORDER BY applied_at ASC, identifier ASC",
                    self.table
                ),
                &[],
            )
            .map_err(|e| Error::Ledger(format!("failed to read {}: {e}", self.table)))?;

        rows.iter().map(|row| self.parse_record(row)).collect()
    }

    /// Identifiers of applied migrations, oldest first.
    pub fn applied(&self, db: &mut dyn Database) -> Result<Vec<MigrationId>> {
        Ok(self
            .records(db)?
            .into_iter()
            .map(|r| r.identifier)
            .collect())
    }

    pub fn applied_set(&self, db: &mut dyn Database) -> Result<HashSet<MigrationId>> {
        Ok(self.applied(db)?.into_iter().collect())
    }

    pub fn contains(&self, db: &mut dyn Database, id: &MigrationId) -> Result<bool> {
        let rows = db
            .query(
                &format!("SELECT 1 AS hit FROM {} WHERE identifier = ?1", self.table),
                &[id.as_str().into()],
            )
            .map_err(|e| Error::Ledger(format!("failed to read {}: {e}", self.table)))?;
        Ok(!rows.is_empty())
    }

    /// Record `id` as applied now. Must be called inside the same transaction
    /// as the migration itself.
    pub fn record(
        &self,
        db: &mut dyn Database,
        id: &MigrationId,
        description: &str,
    ) -> Result<MigrationRecord> {
        let applied_at = Utc::now();
        db.execute(
            &format!(
                "INSERT INTO {} (identifier, applied_at, description) VALUES (?1, ?2, ?3)",
                self.table
            ),
            &[
                id.as_str().into(),
                applied_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true)
                    .into(),
                description.into(),
            ],
        )
        .map_err(|e| Error::Ledger(format!("failed to record {id}: {e}")))?;

        Ok(MigrationRecord {
            identifier: id.clone(),
            applied_at,
            description: Some(description.to_string()),
        })
    }

    fn parse_record(&self, row: &Row) -> Result<MigrationRecord> {
        let raw_id = row
            .get("identifier")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Ledger(format!("{} row without identifier", self.table)))?;
        let identifier = MigrationId::parse(raw_id)
            .map_err(|e| Error::Ledger(format!("{} holds a corrupt entry: {e}", self.table)))?;

        let raw_ts = row
            .get("applied_at")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Ledger(format!("{identifier} has no applied_at")))?;
        let applied_at = parse_datetime(raw_ts)
            .ok_or_else(|| Error::Ledger(format!("{identifier} has bad applied_at {raw_ts:?}")))?;

        let description = row
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(MigrationRecord {
            identifier,
            applied_at,
            description,
        })
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
