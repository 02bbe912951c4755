use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_shared::error::{AuthError, ProtocolError};
use tally_shared::protocol::ErrorBody;
use tally_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Vault already exists")]
    VaultExists,

    #[error("Version conflict: latest snapshot version is {latest}")]
    VersionConflict { latest: u64 },

    #[error("Version too old: history below snapshot version {horizon} was pruned")]
    VersionTooOld { horizon: u64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::VaultExists | ServerError::VersionConflict { .. } => StatusCode::CONFLICT,
            ServerError::VersionTooOld { .. } => StatusCode::GONE,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code; clients branch on this, not on the message.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Auth(e) => e.code(),
            ServerError::Forbidden(_) => "forbidden",
            ServerError::NotFound(_) => "not_found",
            ServerError::VaultExists => "vault_exists",
            ServerError::VersionConflict { .. } => "version_conflict",
            ServerError::VersionTooOld { .. } => "version_too_old",
            ServerError::BadRequest(_) => "invalid_request",
            ServerError::PayloadTooLarge => "payload_too_large",
            ServerError::RateLimited => "rate_limited",
            ServerError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("resource not found".into()),
            StoreError::VaultExists => ServerError::VaultExists,
            StoreError::VersionConflict { latest } => ServerError::VersionConflict { latest },
            StoreError::VersionTooOld { horizon } => ServerError::VersionTooOld { horizon },
            StoreError::NotPermitted(msg) => ServerError::Forbidden(msg),
            StoreError::Invalid(msg) => ServerError::BadRequest(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
