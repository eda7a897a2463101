mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailprint_config::{AppConfig, ConfigLoader};
use mailprint_db::schema::{create_tables, drop_tables};
use mailprint_db::{Database, Ledger, MigrationRunner, PostgresDatabase, SqlIdent, SqliteDatabase};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailprint", version, about = "Schema migrations for the mail-printing database")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.mailprint/config.yml.
    #[arg(short, long, env = "MAILPRINT_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config.
    #[arg(short, long, env = "MAILPRINT_DATABASE")]
    database: Option<PathBuf>,

    /// PostgreSQL connection string; takes precedence over any database file.
    #[arg(long, env = "MAILPRINT_DATABASE_URL")]
    database_url: Option<String>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations.
    Migrate {
        /// Migrations directory, overriding the config.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show applied and pending migrations.
    Status {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create the base mail-printing tables.
    InitSchema,
    /// Drop the base mail-printing tables. Ledger tables are kept.
    DropSchema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_default()?,
    };
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
        config.database.in_memory = false;
        config.database.url = None;
    }
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }

    let mut db = open_database(&config)?;
    let ledger = Ledger::new(
        SqlIdent::parse(&config.migrations.ledger_table)
            .context("invalid migrations.ledger_table")?,
    );
    let runner = MigrationRunner::with_ledger(ledger);

    match cli.command {
        Command::Migrate { dir } => {
            let dir = dir.unwrap_or_else(|| config.migrations.directory.clone());
            let report = runner
                .run(&mut *db, &dir)
                .with_context(|| format!("migrating from {}", dir.display()))?;
            report::print_run(&report);
        }
        Command::Status { dir, json } => {
            let dir = dir.unwrap_or_else(|| config.migrations.directory.clone());
            let status = runner
                .status(&mut *db, &dir)
                .with_context(|| format!("reading status of {}", dir.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                report::print_status(&status, &dir);
            }
        }
        Command::InitSchema => {
            create_tables(&mut *db).context("creating base schema")?;
            println!("Base schema created.");
        }
        Command::DropSchema => {
            drop_tables(&mut *db).context("dropping base schema")?;
            println!("Base schema dropped.");
        }
    }

    db.close()?;
    Ok(())
}

fn open_database(config: &AppConfig) -> Result<Box<dyn Database>> {
    if let Some(url) = &config.database.url {
        let db = PostgresDatabase::connect(url).context("connecting to postgres")?;
        return Ok(Box::new(db));
    }
    if config.database.in_memory {
        info!("using in-memory database");
        return Ok(Box::new(SqliteDatabase::in_memory()?));
    }
    let path = &config.database.path;
    let db = SqliteDatabase::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(db))
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_with_overrides() {
        let cli = Cli::try_parse_from([
            "mailprint",
            "--database",
            "/tmp/mail.db",
            "migrate",
            "--dir",
            "sql",
        ])
        .unwrap();

        assert_eq!(cli.database.as_deref(), Some(std::path::Path::new("/tmp/mail.db")));
        match cli.command {
            Command::Migrate { dir } => {
                assert_eq!(dir.as_deref(), Some(std::path::Path::new("sql")));
            }
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn database_url_flag() {
        let cli = Cli::try_parse_from([
            "mailprint",
            "--database-url",
            "postgres://postgres@localhost/mailprint",
            "init-schema",
        ])
        .unwrap();
        assert_eq!(
            cli.database_url.as_deref(),
            Some("postgres://postgres@localhost/mailprint")
        );
        assert!(matches!(cli.command, Command::InitSchema));
    }

    #[test]
    fn status_json_flag() {
        let cli = Cli::try_parse_from(["mailprint", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status { json: true, dir: None }));
    }
}
