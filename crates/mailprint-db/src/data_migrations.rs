use std::collections::BTreeMap;
use std::path::Path;

use mailprint_common::{Error, Result};
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::database::{Database, Value};
use crate::identifier::{MigrationId, SqlIdent};
use crate::ledger::Ledger;

/// Multiplier applied to material unit costs by [`update_price_calculations`].
pub const PRICE_INCREASE: f64 = 1.05;

/// Applies code-defined data migrations and tracks them in the
/// `data_migrations` ledger.
///
/// The migration function runs inside the transaction opened here and must
/// not commit on its own.
#[derive(Debug, Clone)]
pub struct DataMigrator {
    ledger: Ledger,
}

impl Default for DataMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl DataMigrator {
    pub fn new() -> Self {
        Self {
            ledger: Ledger::data(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run `migrate` once under `id`. Returns `false` if `id` is already in
    /// the ledger.
    pub fn apply<F>(
        &self,
        db: &mut dyn Database,
        id: &MigrationId,
        description: Option<&str>,
        migrate: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut dyn Database) -> Result<()>,
    {
        self.ledger.ensure(db)?;
        if self.ledger.contains(db, id)? {
            debug!("skipping data migration {id}: already applied");
            return Ok(false);
        }

        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Applied migration {id}"));

        db.begin().map_err(|e| Error::migration(id.as_str(), e))?;
        let outcome = migrate(&mut *db)
            .map_err(|e| Error::migration(id.as_str(), e))
            .and_then(|()| self.ledger.record(db, id, &description).map(drop))
            .and_then(|()| db.commit().map_err(|e| Error::migration(id.as_str(), e)));

        if let Err(e) = outcome {
            if let Err(rb) = db.rollback() {
                warn!("rollback of data migration {id} failed: {rb}");
            }
            return Err(e);
        }
        info!("applied data migration {id}");
        Ok(true)
    }
}

/// Uppercase state codes and format nine-digit postal codes as `NNNNN-NNNN`.
pub fn transform_addresses(db: &mut dyn Database) -> Result<()> {
    let rows = db.query("SELECT address_id, state, postal_code FROM addresses", &[])?;

    let mut changed = 0;
    for row in &rows {
        let Some(address_id) = row.get("address_id").and_then(Value::as_i64) else {
            continue;
        };
        let state = row
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        let postal_code = format_postal_code(
            row.get("postal_code")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );

        changed += db.execute(
            "UPDATE addresses SET state = ?1, postal_code = ?2 WHERE address_id = ?3",
            &[state.into(), postal_code.into(), address_id.into()],
        )?;
    }
    debug!("normalised {changed} addresses");
    Ok(())
}

fn format_postal_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == 9 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}", &trimmed[..5], &trimmed[5..])
    } else {
        trimmed.to_string()
    }
}

/// Collapse customers whose email addresses match case-insensitively into
/// the lowest `customer_id`, repointing addresses, list members and mail
/// items first.
pub fn merge_duplicate_customers(db: &mut dyn Database) -> Result<()> {
    let rows = db.query(
        "SELECT customer_id, lower(trim(email)) AS email_key FROM customers
         WHERE email IS NOT NULL
         ORDER BY email_key, customer_id",
        &[],
    )?;

    let mut by_email: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for row in &rows {
        if let (Some(id), Some(email)) = (
            row.get("customer_id").and_then(Value::as_i64),
            row.get("email_key").and_then(Value::as_str),
        ) {
            by_email.entry(email.to_string()).or_default().push(id);
        }
    }

    for (email, ids) in by_email {
        let Some((&primary, duplicates)) = ids.split_first() else {
            continue;
        };
        for &duplicate in duplicates {
            for sql in [
                "UPDATE addresses SET customer_id = ?1 WHERE customer_id = ?2",
                "UPDATE list_members SET customer_id = ?1 WHERE customer_id = ?2",
                "UPDATE mail_items SET customer_id = ?1 WHERE customer_id = ?2",
            ] {
                db.execute(sql, &[primary.into(), duplicate.into()])?;
            }
            db.execute(
                "DELETE FROM customers WHERE customer_id = ?1",
                &[duplicate.into()],
            )?;
        }
        if !duplicates.is_empty() {
            debug!("merged {} duplicates of {email}", duplicates.len());
        }
    }
    Ok(())
}

/// Raise every material's unit cost by [`PRICE_INCREASE`].
pub fn update_price_calculations(db: &mut dyn Database) -> Result<()> {
    let changed = db.execute(
        "UPDATE materials SET unit_cost = unit_cost * %s",
        &[PRICE_INCREASE.into()],
    )?;
    debug!("repriced {changed} materials");
    Ok(())
}

/// Insert the records of a JSON array of objects into `table`, returning how
/// many were inserted.
///
/// Columns come from the keys of the first record; keys that only appear in
/// later records are ignored and missing keys insert `NULL`. Every record is
/// inserted in one transaction, so a bad record leaves the table unchanged.
pub fn import_data_from_json(
    db: &mut dyn Database,
    json_file: &Path,
    table: &SqlIdent,
) -> Result<usize> {
    let raw = std::fs::read_to_string(json_file)?;
    let records: Vec<Map<String, serde_json::Value>> = serde_json::from_str(&raw)?;
    let Some(first) = records.first() else {
        return Ok(0);
    };

    let columns = first
        .keys()
        .map(|key| SqlIdent::parse(key))
        .collect::<Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Error::InvalidIdentifier(format!(
            "first record in {} has no fields",
            json_file.display()
        )));
    }

    let column_list: Vec<&str> = columns.iter().map(SqlIdent::as_str).collect();
    let placeholders = vec!["%s"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        column_list.join(", ")
    );

    db.begin()?;
    let outcome = records.iter().enumerate().try_for_each(|(idx, record)| {
        let values = columns
            .iter()
            .map(|col| json_to_value(record.get(col.as_str())))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::Database(format!("record {idx}: {e}")))?;
        db.execute(&sql, &values)
            .map(drop)
            .map_err(|e| Error::Database(format!("record {idx}: {e}")))
    });

    match outcome.and_then(|()| db.commit()) {
        Ok(()) => {
            info!("imported {} records into {table}", records.len());
            Ok(records.len())
        }
        Err(e) => {
            if let Err(rb) = db.rollback() {
                warn!("rollback of import into {table} failed: {rb}");
            }
            Err(e)
        }
    }
}

fn json_to_value(value: Option<&serde_json::Value>) -> Result<Value> {
    use serde_json::Value as Json;

    Ok(match value {
        None | Some(Json::Null) => Value::Null,
        Some(Json::Bool(b)) => Value::Integer(i64::from(*b)),
        Some(Json::Number(n)) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Some(Json::String(s)) => Value::Text(s.clone()),
        Some(other @ (Json::Array(_) | Json::Object(_))) => {
            return Err(Error::Database(format!(
                "nested value {other} cannot be stored in a column"
            )));
        }
    })
}
