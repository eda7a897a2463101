pub mod data_migrations;
pub mod database;
pub mod identifier;
pub mod ledger;
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_support;

pub use data_migrations::{
    DataMigrator, import_data_from_json, merge_duplicate_customers, transform_addresses,
    update_price_calculations,
};
pub use database::{Backend, ColumnInfo, Database, Row, SqliteDatabase, Value};
pub use identifier::{MigrationId, SqlIdent};
pub use ledger::{Ledger, MigrationRecord};
pub use migrations::{MigrationFile, MigrationRunner, MigrationStatus, RunReport, StatusEntry};
#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresDatabase;
