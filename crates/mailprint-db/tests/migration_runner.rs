mod common;

use mailprint_common::{Error, Result};
use mailprint_db::schema::{table_columns, table_exists};
use mailprint_db::{Backend, ColumnInfo, Database, MigrationRunner, Row, SqliteDatabase, Value};

use common::{ledger_ids, migration_db, write_migration};

#[test]
fn applies_in_lexicographic_order() {
    let dir = tempfile::tempdir().unwrap();
    // Each migration records its own position so apply order is observable.
    write_migration(
        dir.path(),
        "001_a.sql",
        "CREATE TABLE apply_log (seq INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
         INSERT INTO apply_log (name) VALUES ('001_a');",
    );
    write_migration(
        dir.path(),
        "010_b.sql",
        "INSERT INTO apply_log (name) VALUES ('010_b');",
    );
    write_migration(
        dir.path(),
        "002_c.sql",
        "INSERT INTO apply_log (name) VALUES ('002_c');",
    );
    let mut db = SqliteDatabase::in_memory().unwrap();

    let report = MigrationRunner::new().run(&mut db, dir.path()).unwrap();

    let applied: Vec<_> = report.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, ["001_a", "002_c", "010_b"]);

    let log: Vec<_> = db
        .query("SELECT name FROM apply_log ORDER BY seq", &[])
        .unwrap()
        .into_iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(log, ["001_a", "002_c", "010_b"]);
    assert_eq!(ledger_ids(&mut db), ["001_a", "002_c", "010_b"]);
}

#[test]
fn second_run_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_add_contact_preference.sql",
        "ALTER TABLE customers ADD COLUMN contact_preference TEXT DEFAULT 'email';",
    );
    let mut db = migration_db();
    let runner = MigrationRunner::new();

    let first = runner.run(&mut db, dir.path()).unwrap();
    assert_eq!(first.applied_count(), 1);
    let ledger_after_first = runner.ledger().records(&mut db).unwrap();

    let second = runner.run(&mut db, dir.path()).unwrap();
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(runner.ledger().records(&mut db).unwrap(), ledger_after_first);
}

#[test]
fn failure_keeps_earlier_migrations_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_add_priority.sql",
        "ALTER TABLE mail_items ADD COLUMN priority TEXT DEFAULT 'standard';",
    );
    write_migration(
        dir.path(),
        "002_broken.sql",
        "CREATE TABLE half_done (id INTEGER);
         ALTER TABLE no_such_table ADD COLUMN x TEXT;",
    );
    write_migration(
        dir.path(),
        "003_add_cost_center.sql",
        "ALTER TABLE print_jobs ADD COLUMN cost_center TEXT DEFAULT 'GENERAL';",
    );
    let mut db = migration_db();

    let err = MigrationRunner::new().run(&mut db, dir.path()).unwrap_err();

    match &err {
        Error::Migration { id, message } => {
            assert_eq!(id, "002_broken");
            assert!(message.contains("no_such_table"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger_ids(&mut db), ["001_add_priority"]);
    assert!(has_column(&mut db, "mail_items", "priority"));
    assert!(!table_exists(&mut db, "half_done").unwrap());
    assert!(!has_column(&mut db, "print_jobs", "cost_center"));
}

#[test]
fn fixing_a_failed_migration_resumes_from_it() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER);");
    write_migration(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER");
    let mut db = SqliteDatabase::in_memory().unwrap();
    let runner = MigrationRunner::new();

    assert!(runner.run(&mut db, dir.path()).is_err());
    write_migration(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER);");

    let report = runner.run(&mut db, dir.path()).unwrap();
    let applied: Vec<_> = report.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, ["002_b"]);
    assert_eq!(report.skipped, 1);
}

#[test]
fn added_column_carries_declared_default() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_add_contact_preference.sql",
        "ALTER TABLE customers ADD COLUMN contact_preference TEXT DEFAULT 'email';",
    );
    let mut db = migration_db();

    MigrationRunner::new().run(&mut db, dir.path()).unwrap();

    let columns = table_columns(&mut db, "customers").unwrap();
    let column = columns
        .iter()
        .find(|c| c.name == "contact_preference")
        .expect("column added");
    assert_eq!(column.default.as_deref(), Some("'email'"));

    let rows: Vec<Row> = db
        .query("SELECT contact_preference FROM customers ORDER BY customer_id", &[])
        .unwrap();
    assert!(rows.iter().all(|r| r["contact_preference"].as_str() == Some("email")));
}

#[test]
fn empty_directory_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = migration_db();
    let before = schema_snapshot(&mut db);

    let report = MigrationRunner::new().run(&mut db, dir.path()).unwrap();

    assert_eq!(report.applied_count(), 0);
    assert!(ledger_ids(&mut db).is_empty());
    let after: Vec<_> = schema_snapshot(&mut db)
        .into_iter()
        .filter(|name| name != "schema_migrations")
        .collect();
    assert_eq!(after, before);
}

#[test]
fn rerun_after_adding_a_file_applies_only_that_file() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_add_priority.sql",
        "ALTER TABLE mail_items ADD COLUMN priority TEXT DEFAULT 'standard';",
    );
    let mut db = migration_db();
    let runner = MigrationRunner::new();
    runner.run(&mut db, dir.path()).unwrap();

    write_migration(
        dir.path(),
        "002_add_cost_center.sql",
        "ALTER TABLE print_jobs ADD COLUMN cost_center TEXT DEFAULT 'GENERAL';",
    );
    let report = runner.run(&mut db, dir.path()).unwrap();

    let applied: Vec<_> = report.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, ["002_add_cost_center"]);
    assert_eq!(
        ledger_ids(&mut db),
        ["001_add_priority", "002_add_cost_center"]
    );
    assert!(has_column(&mut db, "print_jobs", "cost_center"));
}

#[test]
fn modified_file_with_same_name_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER);");
    let mut db = SqliteDatabase::in_memory().unwrap();
    let runner = MigrationRunner::new();
    runner.run(&mut db, dir.path()).unwrap();

    write_migration(dir.path(), "001_a.sql", "CREATE TABLE a2 (id INTEGER);");
    let report = runner.run(&mut db, dir.path()).unwrap();

    assert_eq!(report.applied_count(), 0);
    assert!(!table_exists(&mut db, "a2").unwrap());
}

#[test]
fn hyphenated_migration_name_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_create-widgets.sql",
        "CREATE TABLE widgets (id INTEGER);",
    );
    let mut db = SqliteDatabase::in_memory().unwrap();

    let report = MigrationRunner::new().run(&mut db, dir.path()).unwrap();

    let applied: Vec<_> = report.applied.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, ["001_create-widgets"]);
    assert!(table_exists(&mut db, "widgets").unwrap());
    assert_eq!(ledger_ids(&mut db), ["001_create-widgets"]);
}

#[test]
fn unusable_migration_name_fails_the_run_instead_of_being_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER);");
    write_migration(
        dir.path(),
        "002_add widgets.sql",
        "CREATE TABLE widgets (id INTEGER);",
    );
    let mut db = SqliteDatabase::in_memory().unwrap();

    let err = MigrationRunner::new().run(&mut db, dir.path()).unwrap_err();

    match err {
        Error::InvalidIdentifier(message) => {
            assert!(message.contains("002_add widgets"), "{message}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ledger_ids(&mut db).is_empty());
    assert!(!table_exists(&mut db, "a").unwrap());
}

/// Passes everything through to SQLite but fails the Nth commit.
struct FailingCommit {
    inner: SqliteDatabase,
    commits_left: usize,
    rollbacks: usize,
}

impl Database for FailingCommit {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.inner.execute(sql, params)
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.inner.execute_script(sql)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner.query(sql, params)
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        if self.commits_left == 0 {
            return Err(Error::Database("disk I/O error".into()));
        }
        self.commits_left -= 1;
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.rollbacks += 1;
        self.inner.rollback()
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.inner.table_exists(table)
    }

    fn index_exists(&mut self, index: &str) -> Result<bool> {
        self.inner.index_exists(index)
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.inner.table_columns(table)
    }

    fn table_definitions(&mut self) -> Result<Vec<String>> {
        self.inner.table_definitions()
    }
}

#[test]
fn commit_failure_rolls_back_script_and_ledger_row() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "001_a.sql", "CREATE TABLE a (id INTEGER);");
    write_migration(dir.path(), "002_b.sql", "CREATE TABLE b (id INTEGER);");
    let mut db = FailingCommit {
        inner: SqliteDatabase::in_memory().unwrap(),
        commits_left: 1,
        rollbacks: 0,
    };

    let err = MigrationRunner::new().run(&mut db, dir.path()).unwrap_err();

    assert!(matches!(err, Error::Migration { ref id, .. } if id == "002_b"));
    assert_eq!(db.rollbacks, 1);
    assert_eq!(ledger_ids(&mut db.inner), ["001_a"]);
    assert!(table_exists(&mut db.inner, "a").unwrap());
    assert!(!table_exists(&mut db.inner, "b").unwrap());
}

fn has_column(db: &mut dyn Database, table: &str, column: &str) -> bool {
    table_columns(db, table)
        .unwrap()
        .iter()
        .any(|c| c.name == column)
}

fn schema_snapshot(db: &mut dyn Database) -> Vec<String> {
    db.query(
        "SELECT name FROM sqlite_master WHERE name NOT LIKE 'sqlite_%' ORDER BY name",
        &[],
    )
    .unwrap()
    .into_iter()
    .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
    .collect()
}
