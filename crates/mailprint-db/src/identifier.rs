use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use mailprint_common::{Error, Result};
use regex::Regex;
use serde::Serialize;

static MIGRATION_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+_.*\.sql$").expect("migration file pattern"));

static MIGRATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+_[A-Za-z0-9_.-]+$").expect("migration id pattern"));

static SQL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("sql identifier pattern"));

const MAX_IDENT_LEN: usize = 63;

/// Identifier of a migration, taken from a file stem such as `001_add_priority`
/// or `002_create-widgets`.
///
/// Ordering is plain lexicographic order of the string, which is the order
/// migrations are applied in. Zero-padded numeric prefixes keep that order
/// aligned with the numbers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    pub fn parse(raw: &str) -> Result<Self> {
        if MIGRATION_ID.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidIdentifier(format!(
                "migration id {raw:?} must be digits, an underscore, then letters, digits, '_', '.' or '-'"
            )))
        }
    }

    /// Derive an identifier from a file path.
    ///
    /// Files not named `<digits>_<anything>.sql` are not migrations and give
    /// `Ok(None)`. A migration file whose stem is not a valid identifier is
    /// an error rather than being passed over.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        if !MIGRATION_FILE.is_match(name) {
            return Ok(None);
        }
        let stem = &name[..name.len() - ".sql".len()];
        Self::parse(stem).map(Some)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A table, column or index name that is safe to splice into SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlIdent(String);

impl SqlIdent {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() > MAX_IDENT_LEN {
            return Err(Error::InvalidIdentifier(format!(
                "{raw:?} is longer than {MAX_IDENT_LEN} characters"
            )));
        }
        if !SQL_IDENT.is_match(raw) {
            return Err(Error::InvalidIdentifier(format!(
                "{raw:?} is not a plain SQL identifier"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Wrap a compile-time constant known to match the identifier pattern.
    pub(crate) fn from_static(raw: &'static str) -> Self {
        debug_assert!(SQL_IDENT.is_match(raw));
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for SqlIdent {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}
