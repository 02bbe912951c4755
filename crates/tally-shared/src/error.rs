use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid recovery phrase")]
    InvalidPhrase,

    #[error("Invalid key bytes")]
    InvalidKeyBytes,
}

/// Failures while wrapping or unwrapping a vault key.
///
/// `UnwrapFailed` and `UnsealFailed` are deliberately opaque: a wrong key and
/// a corrupted blob produce the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyWrapError {
    #[error("Invalid vault key size: expected 32 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("Wrapped key blob too short")]
    InvalidLength,

    #[error("Failed to unwrap vault key")]
    UnwrapFailed,

    #[error("Failed to unseal vault key")]
    UnsealFailed,

    #[error("Invalid base64 encoding")]
    InvalidEncoding,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authentication headers")]
    MissingHeaders,

    #[error("Invalid timestamp header")]
    InvalidTimestamp,

    #[error("Request expired")]
    RequestExpired,

    #[error("Invalid signature")]
    InvalidSignature,
}

impl AuthError {
    /// Stable machine-readable code carried in relay error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeaders => "missing_headers",
            AuthError::InvalidTimestamp => "invalid_timestamp",
            AuthError::RequestExpired => "request_expired",
            AuthError::InvalidSignature => "invalid_signature",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HlcError {
    #[error("Malformed HLC timestamp: {0}")]
    Malformed(String),
}

/// A wire request that parsed but violates a field constraint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
