use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Ignore `path` and use a throwaway in-memory database.
    pub in_memory: bool,
    /// PostgreSQL connection string. When set, `path` and `in_memory` are
    /// ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mailprint.db"),
            in_memory: false,
            url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory holding `NNN_name.sql` files.
    pub directory: PathBuf,
    /// Name of the table recording applied migrations.
    pub ledger_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            ledger_table: "schema_migrations".to_string(),
        }
    }
}
