use tally_shared::error::{AuthError, CryptoError, IdentityError, KeyWrapError};
use thiserror::Error;

/// Failures turning bytes into document state.
///
/// Import validates before mutating, so a `CodecError` never leaves the
/// document half-applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed CRDT data: {0}")]
    Decode(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Payload encoding failed: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// Relay unreachable or the connection failed mid-request.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Relay rejected request ({status} {code}): {message}")]
    Relay {
        status: u16,
        code: String,
        message: String,
    },

    /// The relay has a newer snapshot than the one this push was based on.
    #[error("Sync needs refresh: relay snapshot version moved on")]
    VersionConflict,

    /// Local cursor is below what the relay retains.
    #[error("Local sync state is older than the relay's retained history")]
    VersionTooOld,

    /// Authenticated decryption failed. Terminal for this pull.
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request authentication rejected: {0}")]
    Auth(String),

    #[error("No active session")]
    NoSession,

    #[error("Unexpected relay response: {0}")]
    InvalidResponse(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key wrap error: {0}")]
    KeyWrap(#[from] KeyWrapError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl SyncError {
    /// Only transport failures are worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl From<AuthError> for SyncError {
    fn from(e: AuthError) -> Self {
        SyncError::Auth(e.code().to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
