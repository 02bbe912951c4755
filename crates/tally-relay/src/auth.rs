//! Signed-request middleware for vault routes.
//!
//! The body is buffered once, parsed as JSON for the body hash, verified,
//! then handed on unchanged. Handlers read the caller from the
//! [`AuthenticatedCaller`] extension.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tally_shared::auth::{verify_request, SignatureHeaders};
use tally_shared::PubkeyHash;

use crate::api::AppState;
use crate::error::ServerError;

/// Pubkey hash of the verified signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedCaller(pub PubkeyHash);

pub async fn require_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let (parts, body) = req.into_parts();

    let bytes = to_bytes(body, state.config.max_body_size)
        .await
        .map_err(|_| ServerError::PayloadTooLarge)?;
    let json: Option<serde_json::Value> = if bytes.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&bytes)
                .map_err(|e| ServerError::BadRequest(format!("Malformed JSON body: {e}")))?,
        )
    };

    let headers = SignatureHeaders::from_lookup(|name| {
        parts.headers.get(name).and_then(|v| v.to_str().ok())
    })?;
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    let caller = verify_request(
        parts.method.as_str(),
        path,
        json.as_ref(),
        &headers,
        state.config.auth_max_age_ms,
    )
    .map_err(|e| {
        tracing::debug!(method = %parts.method, path, code = e.code(), "rejected signed request");
        e
    })?;

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(AuthenticatedCaller(caller));
    Ok(next.run(req).await)
}
