use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration {id} failed: {message}")]
    Migration { id: String, message: String },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Attach a migration identifier to a lower-level failure.
    pub fn migration(id: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Error::Migration {
            id: id.into(),
            message: source.to_string(),
        }
    }
}
