#![allow(dead_code)]

use std::fs;
use std::path::Path;

use mailprint_db::schema::create_tables;
use mailprint_db::{Database, SqliteDatabase, Value};

/// Connection string of a PostgreSQL server the cross-backend tests may use.
pub const POSTGRES_URL_ENV: &str = "MAILPRINT_TEST_POSTGRES_URL";

/// In-memory database holding the base mail-printing schema and two customers.
pub fn migration_db() -> SqliteDatabase {
    let mut db = SqliteDatabase::in_memory().unwrap();
    create_tables(&mut db).unwrap();
    db.execute_script(
        "INSERT INTO customers (customer_id, name, email, phone) VALUES
            (1, 'John Smith', 'john.smith@example.com', '555-123-4567'),
            (2, 'Jane Doe', 'jane.doe@example.com', NULL);",
    )
    .unwrap();
    db
}

/// An empty database on one backend. PostgreSQL connections work inside a
/// private schema that is dropped again when the value goes away.
pub struct TestDb {
    pub db: Box<dyn Database>,
    scratch_schema: Option<String>,
}

impl TestDb {
    pub fn name(&self) -> &'static str {
        self.db.backend().as_str()
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        if let Some(schema) = self.scratch_schema.take() {
            let _ = self.db.rollback();
            let _ = self
                .db
                .execute_script(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"));
        }
    }
}

/// SQLite always; PostgreSQL too when `MAILPRINT_TEST_POSTGRES_URL` is set.
pub fn available_backends() -> Vec<TestDb> {
    let mut backends = vec![TestDb {
        db: Box::new(SqliteDatabase::in_memory().unwrap()),
        scratch_schema: None,
    }];
    match std::env::var(POSTGRES_URL_ENV) {
        Ok(url) => backends.extend(postgres_db(&url)),
        Err(_) => eprintln!("{POSTGRES_URL_ENV} not set, skipping postgres"),
    }
    backends
}

#[cfg(feature = "postgres")]
fn postgres_db(url: &str) -> Option<TestDb> {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mailprint_db::PostgresDatabase;

    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let schema = format!(
        "mailprint_test_{}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    );

    let mut db = PostgresDatabase::connect(url).unwrap();
    db.execute_script(&format!(
        "CREATE SCHEMA {schema}; SET search_path TO {schema};"
    ))
    .unwrap();
    Some(TestDb {
        db: Box::new(db),
        scratch_schema: Some(schema),
    })
}

#[cfg(not(feature = "postgres"))]
fn postgres_db(_url: &str) -> Option<TestDb> {
    eprintln!("built without the postgres feature, skipping postgres");
    None
}

pub fn write_migration(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

pub fn ledger_ids(db: &mut dyn Database) -> Vec<String> {
    db.query(
        "SELECT identifier FROM schema_migrations ORDER BY applied_at, identifier",
        &[],
    )
    .unwrap()
    .into_iter()
    .filter_map(|r| r.get("identifier").and_then(Value::as_str).map(str::to_string))
    .collect()
}

pub fn strings(rows: Vec<mailprint_db::Row>, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|r| r.get(column).and_then(Value::as_str).map(str::to_string))
        .collect()
}
