//! Migration system for tracking and applying database schema changes.
//!
//! Each migration is a `NNN_name.sql` file in a directory. Pending files are
//! applied in identifier order, one transaction per file, and tracked in the
//! `schema_migrations` ledger.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mailprint_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::identifier::MigrationId;
use crate::ledger::{Ledger, MigrationRecord};

/// A migration file found on disk. Discovered fresh on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub id: MigrationId,
    pub path: PathBuf,
}

impl MigrationFile {
    /// `Ok(None)` when `path` is not named like a migration.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        Ok(MigrationId::from_path(path)?.map(|id| Self {
            id,
            path: path.to_path_buf(),
        }))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.sql", self.id))
    }

    /// Read the script text.
    pub fn read_sql(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            Error::migration(
                self.id.as_str(),
                format!("failed to read {}: {e}", self.path.display()),
            )
        })
    }

    fn default_description(&self) -> String {
        format!("Applied from {}", self.file_name())
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Migrations applied by this run, in the order they were applied.
    pub applied: Vec<MigrationId>,
    /// Discovered migrations that were already in the ledger.
    pub skipped: usize,
}

impl RunReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Applied/pending view of one discovered migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub id: MigrationId,
    pub path: PathBuf,
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusEntry {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationStatus {
    /// Every discovered file, in apply order.
    pub entries: Vec<StatusEntry>,
    /// Ledger entries with no matching file in the directory.
    pub orphaned: Vec<MigrationRecord>,
}

impl MigrationStatus {
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_applied())
    }

    pub fn applied(&self) -> impl Iterator<Item = &StatusEntry> + '_ {
        self.entries.iter().filter(|e| e.is_applied())
    }
}

/// Applies pending migration files from a directory, exactly once each.
///
/// The runner borrows the caller's connection for the length of a call and
/// never opens, pools or closes connections itself. Concurrent runs against
/// the same database are not guarded against.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    ledger: Ledger,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self::with_ledger(Ledger::schema())
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// List migration files in `dir`, sorted by identifier. Entries not named
    /// `<digits>_<name>.sql` are ignored; a matching name that is not a valid
    /// identifier fails the whole scan.
    pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>> {
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "migrations directory not found: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match MigrationFile::from_path(&path)? {
                Some(file) => files.push(file),
                None => debug!("ignoring non-migration file {}", path.display()),
            }
        }
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    /// Apply every pending migration in `dir`.
    ///
    /// Stops at the first failure. That migration is rolled back; migrations
    /// committed earlier in the run stay applied.
    pub fn run(&self, db: &mut dyn Database, dir: &Path) -> Result<RunReport> {
        self.ledger.ensure(db)?;

        debug!("scanning {}", dir.display());
        let files = Self::discover(dir)?;
        let applied = self.ledger.applied_set(db)?;

        let (done, pending): (Vec<_>, Vec<_>) =
            files.into_iter().partition(|f| applied.contains(&f.id));
        let mut report = RunReport {
            applied: Vec::with_capacity(pending.len()),
            skipped: done.len(),
        };
        for file in &done {
            debug!("skipping {}: already applied", file.id);
        }

        let total = pending.len();
        for (idx, file) in pending.iter().enumerate() {
            info!(
                "applying migration {}/{total} on {}: {}",
                idx + 1,
                db.backend(),
                file.id
            );
            let sql = file.read_sql()?;
            if let Err(e) = self.apply_one(db, file, &sql, &file.default_description()) {
                warn!(
                    "migration {} failed, {} remaining not attempted: {e}",
                    file.id,
                    total - idx - 1
                );
                return Err(e);
            }
            report.applied.push(file.id.clone());
        }

        info!(
            "migrations complete: {} applied, {} already applied",
            report.applied_count(),
            report.skipped
        );
        Ok(report)
    }

    /// Apply a single migration file outside a directory scan. Returns
    /// `false` if it is already in the ledger.
    pub fn apply_file(
        &self,
        db: &mut dyn Database,
        path: &Path,
        description: Option<&str>,
    ) -> Result<bool> {
        let file = MigrationFile::from_path(path)?.ok_or_else(|| {
            Error::InvalidIdentifier(format!(
                "{} is not a NNN_name.sql migration file",
                path.display()
            ))
        })?;

        self.ledger.ensure(db)?;
        if self.ledger.contains(db, &file.id)? {
            debug!("skipping {}: already applied", file.id);
            return Ok(false);
        }

        let sql = file.read_sql()?;
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| file.default_description());
        self.apply_one(db, &file, &sql, &description)?;
        info!("applied migration {}", file.id);
        Ok(true)
    }

    /// Compare the directory against the ledger without applying anything.
    pub fn status(&self, db: &mut dyn Database, dir: &Path) -> Result<MigrationStatus> {
        self.ledger.ensure(db)?;
        let files = Self::discover(dir)?;
        let mut records = self.ledger.records(db)?;

        let entries = files
            .into_iter()
            .map(|file| {
                let applied_at = records
                    .iter()
                    .position(|r| r.identifier == file.id)
                    .map(|pos| records.remove(pos).applied_at);
                StatusEntry {
                    id: file.id,
                    path: file.path,
                    applied_at,
                }
            })
            .collect();

        Ok(MigrationStatus {
            entries,
            orphaned: records,
        })
    }

    /// Script, ledger row and commit as one transaction. Any failure rolls
    /// the whole migration back.
    fn apply_one(
        &self,
        db: &mut dyn Database,
        file: &MigrationFile,
        sql: &str,
        description: &str,
    ) -> Result<()> {
        db.begin()
            .map_err(|e| Error::migration(file.id.as_str(), e))?;

        let outcome = db
            .execute_script(sql)
            .map_err(|e| Error::migration(file.id.as_str(), e))
            .and_then(|()| self.ledger.record(db, &file.id, description).map(drop))
            .and_then(|()| {
                db.commit()
                    .map_err(|e| Error::migration(file.id.as_str(), e))
            });

        if let Err(e) = outcome {
            if let Err(rb) = db.rollback() {
                warn!("rollback of {} failed: {rb}", file.id);
            }
            return Err(e);
        }
        Ok(())
    }
}
