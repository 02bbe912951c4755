//! Signed-request authentication.
//!
//! Every relay call carries three headers: the caller's Ed25519 public key,
//! a millisecond timestamp and a detached signature over
//!
//! ```text
//! METHOD \n PATH \n TIMESTAMP \n BODYHASH
//! ```
//!
//! `PATH` includes the query string. `BODYHASH` is the hex BLAKE3 digest of
//! the canonical JSON body (serde_json with sorted object keys), or the empty
//! string when there is no body. The relay holds no session state: a valid
//! signature inside the replay window is the whole authentication.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::{HEADER_PUBKEY, HEADER_SIGNATURE, HEADER_TIMESTAMP, PUBKEY_SIZE};
use crate::error::AuthError;
use crate::identity::{compute_pubkey_hash, Identity};
use crate::types::PubkeyHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHeaders {
    pub pubkey: String,
    pub timestamp: String,
    pub signature: String,
}

impl SignatureHeaders {
    /// Pull the three auth headers out of any header container. Missing or
    /// empty values are rejected here, before any cryptographic work.
    pub fn from_lookup<'a, F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(AuthError::MissingHeaders)
        };
        Ok(Self {
            pubkey: get(HEADER_PUBKEY)?,
            timestamp: get(HEADER_TIMESTAMP)?,
            signature: get(HEADER_SIGNATURE)?,
        })
    }

    /// Header name/value pairs, ready to attach to an outgoing request.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            (HEADER_PUBKEY, self.pubkey.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
            (HEADER_SIGNATURE, self.signature.as_str()),
        ]
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn body_hash(body: Option<&serde_json::Value>) -> String {
    match body {
        // serde_json::Map is a BTreeMap without `preserve_order`, so keys
        // serialize sorted
        Some(value) => {
            let canonical = serde_json::to_vec(value).unwrap_or_default();
            blake3::hash(&canonical).to_hex().to_string()
        }
        None => String::new(),
    }
}

fn signing_message(
    method: &str,
    path: &str,
    timestamp: &str,
    body: Option<&serde_json::Value>,
) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        body_hash(body)
    )
}

pub fn sign_request(
    identity: &Identity,
    method: &str,
    path: &str,
    body: Option<&serde_json::Value>,
) -> SignatureHeaders {
    sign_request_at(identity, method, path, body, now_ms())
}

pub fn sign_request_at(
    identity: &Identity,
    method: &str,
    path: &str,
    body: Option<&serde_json::Value>,
    now_ms: i64,
) -> SignatureHeaders {
    let timestamp = now_ms.to_string();
    let message = signing_message(method, path, &timestamp, body);
    let signature = identity.sign(message.as_bytes());
    SignatureHeaders {
        pubkey: identity.signing_public_b64(),
        timestamp,
        signature: STANDARD.encode(signature.to_bytes()),
    }
}

pub fn verify_request(
    method: &str,
    path: &str,
    body: Option<&serde_json::Value>,
    headers: &SignatureHeaders,
    max_age_ms: i64,
) -> Result<PubkeyHash, AuthError> {
    verify_request_at(method, path, body, headers, max_age_ms, now_ms())
}

pub fn verify_request_at(
    method: &str,
    path: &str,
    body: Option<&serde_json::Value>,
    headers: &SignatureHeaders,
    max_age_ms: i64,
    now_ms: i64,
) -> Result<PubkeyHash, AuthError> {
    let timestamp: i64 = headers
        .timestamp
        .parse()
        .map_err(|_| AuthError::InvalidTimestamp)?;
    if now_ms.abs_diff(timestamp) > max_age_ms.unsigned_abs() {
        return Err(AuthError::RequestExpired);
    }

    let verifying_key = parse_verifying_key(&headers.pubkey).ok_or(AuthError::InvalidSignature)?;
    let signature = parse_signature(&headers.signature).ok_or(AuthError::InvalidSignature)?;

    let message = signing_message(method, path, &headers.timestamp, body);
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidSignature)?;

    Ok(compute_pubkey_hash(&verifying_key.to_bytes()))
}

/// Flattened outcome of a request verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub verified: bool,
    pub pubkey_hash: Option<PubkeyHash>,
    pub error: Option<AuthError>,
}

impl From<Result<PubkeyHash, AuthError>> for VerificationResult {
    fn from(result: Result<PubkeyHash, AuthError>) -> Self {
        match result {
            Ok(hash) => Self {
                verified: true,
                pubkey_hash: Some(hash),
                error: None,
            },
            Err(err) => Self {
                verified: false,
                pubkey_hash: None,
                error: Some(err),
            },
        }
    }
}

fn parse_verifying_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    let arr: [u8; PUBKEY_SIZE] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

fn parse_signature(encoded: &str) -> Option<Signature> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    Signature::from_slice(&bytes).ok()
}

/// Raw detached-signature check. Never panics; malformed input is `false`.
pub fn verify_signature(data: &[u8], signature: &[u8], public_key_b64: &str) -> bool {
    let Some(key) = parse_verifying_key(public_key_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(data, &signature).is_ok()
}

pub fn verify_string_signature(text: &str, signature_b64: &str, public_key_b64: &str) -> bool {
    match STANDARD.decode(signature_b64.trim()) {
        Ok(signature) => verify_signature(text.as_bytes(), &signature, public_key_b64),
        Err(_) => false,
    }
}
