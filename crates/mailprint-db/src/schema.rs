use std::borrow::Cow;
use std::path::Path;

use mailprint_common::{Error, Result};
use tracing::info;

pub use crate::database::ColumnInfo;
use crate::database::{Backend, Database};
use crate::identifier::SqlIdent;

/// Base tables of the mail-printing database, in dependency order.
pub const TABLES: [&str; 11] = [
    "customers",
    "addresses",
    "materials",
    "inventory",
    "mailing_lists",
    "list_members",
    "mailing_campaigns",
    "mail_items",
    "print_jobs",
    "print_queue",
    "delivery_tracking",
];

const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS customers (
    customer_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT UNIQUE,
    phone TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS addresses (
    address_id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL,
    address_type TEXT NOT NULL,
    street_line1 TEXT NOT NULL,
    street_line2 TEXT,
    city TEXT NOT NULL,
    state TEXT NOT NULL,
    postal_code TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT 'USA',
    is_verified BOOLEAN DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (customer_id) REFERENCES customers (customer_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS materials (
    material_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    unit_cost REAL NOT NULL,
    unit_type TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS inventory (
    inventory_id INTEGER PRIMARY KEY AUTOINCREMENT,
    material_id INTEGER NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    location TEXT,
    last_restock_date TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (material_id) REFERENCES materials (material_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS mailing_lists (
    list_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    created_by TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS list_members (
    member_id INTEGER PRIMARY KEY AUTOINCREMENT,
    list_id INTEGER NOT NULL,
    customer_id INTEGER NOT NULL,
    address_id INTEGER NOT NULL,
    status TEXT DEFAULT 'active',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (list_id) REFERENCES mailing_lists (list_id) ON DELETE CASCADE,
    FOREIGN KEY (customer_id) REFERENCES customers (customer_id) ON DELETE CASCADE,
    FOREIGN KEY (address_id) REFERENCES addresses (address_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS mailing_campaigns (
    campaign_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    list_id INTEGER NOT NULL,
    start_date TIMESTAMP,
    end_date TIMESTAMP,
    status TEXT DEFAULT 'draft',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (list_id) REFERENCES mailing_lists (list_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS mail_items (
    item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL,
    customer_id INTEGER NOT NULL,
    address_id INTEGER NOT NULL,
    content_template TEXT,
    status TEXT DEFAULT 'pending',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (campaign_id) REFERENCES mailing_campaigns (campaign_id) ON DELETE CASCADE,
    FOREIGN KEY (customer_id) REFERENCES customers (customer_id) ON DELETE CASCADE,
    FOREIGN KEY (address_id) REFERENCES addresses (address_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS print_jobs (
    job_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT DEFAULT 'queued',
    scheduled_date TIMESTAMP,
    completed_date TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS print_queue (
    queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    print_order INTEGER,
    status TEXT DEFAULT 'queued',
    printed_at TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (job_id) REFERENCES print_jobs (job_id) ON DELETE CASCADE,
    FOREIGN KEY (item_id) REFERENCES mail_items (item_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS delivery_tracking (
    tracking_id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    tracking_number TEXT,
    carrier TEXT,
    status TEXT DEFAULT 'pending',
    shipped_date TIMESTAMP,
    estimated_delivery TIMESTAMP,
    actual_delivery TIMESTAMP,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (item_id) REFERENCES mail_items (item_id) ON DELETE CASCADE
);
";

/// The base DDL in the dialect of `backend`.
fn base_schema_sql(backend: Backend) -> Cow<'static, str> {
    match backend {
        Backend::Sqlite => Cow::Borrowed(CREATE_TABLES_SQL),
        Backend::Postgres => Cow::Owned(
            CREATE_TABLES_SQL
                .replace("INTEGER PRIMARY KEY AUTOINCREMENT", "SERIAL PRIMARY KEY")
                .replace("BOOLEAN DEFAULT 0", "BOOLEAN DEFAULT FALSE"),
        ),
    }
}

/// Create every base table. Safe to call on an existing schema.
pub fn create_tables(db: &mut dyn Database) -> Result<()> {
    let sql = base_schema_sql(db.backend());
    db.execute_script(&sql)
        .map_err(|e| Error::Database(format!("failed to create tables: {e}")))?;
    info!("created {} base tables", TABLES.len());
    Ok(())
}

/// Run the schema script at `schema_path` as one batch.
pub fn init_schema(db: &mut dyn Database, schema_path: &Path) -> Result<()> {
    let sql = std::fs::read_to_string(schema_path)?;
    db.execute_script(&sql).map_err(|e| {
        Error::Database(format!(
            "failed to run schema {}: {e}",
            schema_path.display()
        ))
    })?;
    info!("initialised schema from {}", schema_path.display());
    Ok(())
}

/// Write a `CREATE TABLE` statement for every table to `output_path`.
/// Returns the number of tables written.
pub fn export_schema_to_file(db: &mut dyn Database, output_path: &Path) -> Result<usize> {
    let definitions = db.table_definitions()?;
    let mut out = String::new();
    for ddl in &definitions {
        out.push_str(ddl);
        out.push_str(";\n\n");
    }
    std::fs::write(output_path, out)?;
    info!(
        "exported {} table definitions to {}",
        definitions.len(),
        output_path.display()
    );
    Ok(definitions.len())
}

/// Drop every base table, children first. Ledger tables are left alone.
pub fn drop_tables(db: &mut dyn Database) -> Result<()> {
    for table in TABLES.iter().rev() {
        db.execute(&format!("DROP TABLE IF EXISTS {table}"), &[])
            .map_err(|e| Error::Database(format!("failed to drop {table}: {e}")))?;
    }
    info!("dropped {} base tables", TABLES.len());
    Ok(())
}

/// `ALTER TABLE <table> ADD COLUMN <column> <definition>`.
///
/// `definition` is the type and constraint text (`TEXT DEFAULT 'email'`); it
/// may not contain statement separators or comments.
pub fn add_column(
    db: &mut dyn Database,
    table: &SqlIdent,
    column: &SqlIdent,
    definition: &str,
) -> Result<()> {
    check_definition(definition)?;
    db.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"),
        &[],
    )?;
    info!("added column {table}.{column}");
    Ok(())
}

pub fn rename_table(db: &mut dyn Database, old_name: &SqlIdent, new_name: &SqlIdent) -> Result<()> {
    db.execute(&format!("ALTER TABLE {old_name} RENAME TO {new_name}"), &[])?;
    info!("renamed table {old_name} to {new_name}");
    Ok(())
}

/// Create an index if it does not exist. The default name is
/// `idx_<table>_<col1>_<col2>...`. Returns the index name used.
pub fn create_index(
    db: &mut dyn Database,
    table: &SqlIdent,
    columns: &[SqlIdent],
    index_name: Option<&SqlIdent>,
) -> Result<SqlIdent> {
    if columns.is_empty() {
        return Err(Error::InvalidIdentifier(format!(
            "index on {table} needs at least one column"
        )));
    }
    let column_list: Vec<&str> = columns.iter().map(SqlIdent::as_str).collect();

    let name = match index_name {
        Some(name) => name.clone(),
        None => SqlIdent::parse(&format!("idx_{table}_{}", column_list.join("_")))?,
    };

    db.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table} ({})",
            column_list.join(", ")
        ),
        &[],
    )?;
    info!("created index {name}");
    Ok(name)
}

pub fn table_exists(db: &mut dyn Database, table: &str) -> Result<bool> {
    db.table_exists(table)
}

pub fn index_exists(db: &mut dyn Database, index: &str) -> Result<bool> {
    db.index_exists(index)
}

pub fn table_columns(db: &mut dyn Database, table: &str) -> Result<Vec<ColumnInfo>> {
    db.table_columns(table)
}

fn check_definition(definition: &str) -> Result<()> {
    if definition.trim().is_empty() {
        return Err(Error::InvalidIdentifier("empty column definition".into()));
    }
    if definition.contains(';') || definition.contains("--") || definition.contains("/*") {
        return Err(Error::InvalidIdentifier(format!(
            "column definition {definition:?} contains a statement separator or comment"
        )));
    }
    Ok(())
}
