use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_UPDATE_LIMIT, MAX_UPDATE_LIMIT, PUBKEY_SIZE};
use crate::error::ProtocolError;
use crate::hlc::Hlc;
use crate::types::{PubkeyHash, VaultId};

/// Latest full encrypted state of a vault, as returned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub vault_id: VaultId,
    pub version: u64,
    pub hlc_timestamp: Hlc,
    pub encrypted_data: String,
    /// Highest update sequence folded into this snapshot.
    pub through_seq: u64,
    pub created_at: DateTime<Utc>,
}

/// One incremental encrypted delta. `seq` is the relay-assigned arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub id: String,
    pub seq: u64,
    pub vault_id: VaultId,
    pub base_snapshot_version: u64,
    pub hlc_timestamp: Hlc,
    pub author_pubkey_hash: PubkeyHash,
    pub encrypted_data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveSnapshotRequest {
    pub encrypted_data: String,
    pub version: u64,
    pub hlc_timestamp: Hlc,
    #[serde(default)]
    pub through_seq: u64,
}

impl SaveSnapshotRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        validate_encrypted_data(&self.encrypted_data)?;
        if self.version == 0 {
            return Err(ProtocolError::invalid("version", "must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshotResponse {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PushUpdateRequest {
    pub encrypted_data: String,
    pub base_snapshot_version: u64,
    pub hlc_timestamp: Hlc,
}

impl PushUpdateRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        validate_encrypted_data(&self.encrypted_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushUpdateResponse {
    pub update_id: String,
    pub seq: u64,
}

/// Query string of `GET /vaults/{id}/updates`.
///
/// `since` filters on base snapshot version, `after` on arrival sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatesQuery {
    pub since: Option<u64>,
    pub after: Option<u64>,
    pub limit: Option<u32>,
}

impl UpdatesQuery {
    pub fn effective_limit(&self) -> Result<u32, ProtocolError> {
        match self.limit {
            None => Ok(DEFAULT_UPDATE_LIMIT),
            Some(n) if (1..=MAX_UPDATE_LIMIT).contains(&n) => Ok(n),
            Some(n) => Err(ProtocolError::invalid(
                "limit",
                format!("{n} outside 1..={MAX_UPDATE_LIMIT}"),
            )),
        }
    }

    /// Render as a query string (leading `?` included, empty when unset).
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(since) = self.since {
            parts.push(format!("since={since}"));
        }
        if let Some(after) = self.after {
            parts.push(format!("after={after}"));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("?{}", parts.join("&"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub has_snapshot: bool,
    pub latest_snapshot_id: Option<String>,
    pub latest_snapshot_version: u64,
    pub latest_snapshot_hlc: Option<Hlc>,
    pub latest_snapshot_at: Option<DateTime<Utc>>,
    /// Updates not yet folded into the latest snapshot.
    pub pending_update_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateVaultRequest {
    pub vault_id: VaultId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultInfo {
    pub vault_id: VaultId,
    pub owner_pubkey_hash: PubkeyHash,
    pub created_at: DateTime<Utc>,
}

/// Body of `PUT /vaults/{id}/keys`. `sender_pubkey_b64` is the sender's
/// X25519 public key for an authenticated wrap, absent for a sealed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PutWrappedKeyRequest {
    pub recipient_pubkey_hash: PubkeyHash,
    pub wrapped_key_b64: String,
    #[serde(default)]
    pub sender_pubkey_b64: Option<String>,
}

impl PutWrappedKeyRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let wrapped = decode_b64("wrappedKeyB64", &self.wrapped_key_b64)?;
        if wrapped.is_empty() {
            return Err(ProtocolError::invalid("wrappedKeyB64", "must not be empty"));
        }
        if let Some(sender) = &self.sender_pubkey_b64 {
            if decode_b64("senderPubkeyB64", sender)?.len() != PUBKEY_SIZE {
                return Err(ProtocolError::invalid(
                    "senderPubkeyB64",
                    format!("expected {PUBKEY_SIZE} bytes"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedVaultKey {
    pub vault_id: VaultId,
    pub recipient_pubkey_hash: PubkeyHash,
    pub wrapped_key_b64: String,
    pub sender_pubkey_b64: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// JSON body of every relay error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

fn decode_b64(field: &'static str, value: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(value)
        .map_err(|_| ProtocolError::invalid(field, "not valid base64"))
}

pub fn validate_encrypted_data(value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::invalid("encryptedData", "must not be empty"));
    }
    decode_b64("encryptedData", value).map(|_| ())
}
