use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    /// The vault id is already registered to a different owner.
    #[error("Vault already exists")]
    VaultExists,

    /// Push onto a base other than the latest snapshot, or a snapshot that
    /// does not advance the version.
    #[error("Version conflict: latest snapshot version is {latest}")]
    VersionConflict { latest: u64 },

    /// The requested range reaches below what retention has kept.
    #[error("Requested history has been pruned (oldest retained snapshot version {horizon})")]
    VersionTooOld { horizon: u64 },

    /// The caller may not write this record.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn from_query(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        }
    }
}
