//! Typed, signed calls to the relay API.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tally_shared::protocol::{
    CreateVaultRequest, ErrorBody, PushUpdateRequest, PushUpdateResponse, PutWrappedKeyRequest,
    SaveSnapshotRequest, SaveSnapshotResponse, Snapshot, SyncStatus, Update, UpdatesQuery,
    VaultInfo, WrappedVaultKey,
};
use tally_shared::VaultId;

use crate::error::{Result, SyncError};
use crate::session::Session;
use crate::transport::{RelayRequest, RelayResponse, RelayTransport};

#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<dyn RelayTransport>,
    session: Arc<Session>,
}

impl RelayClient {
    pub fn new(transport: Arc<dyn RelayTransport>, session: Arc<Session>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn create_vault(&self, vault_id: &VaultId) -> Result<VaultInfo> {
        let body = CreateVaultRequest {
            vault_id: *vault_id,
        };
        self.send("POST", "/vaults".to_string(), Some(&body)).await
    }

    /// `None` when the vault has no snapshot yet.
    pub async fn get_snapshot(&self, vault_id: &VaultId) -> Result<Option<Snapshot>> {
        self.send::<(), _>("GET", format!("/vaults/{vault_id}/snapshot"), None)
            .await
    }

    pub async fn save_snapshot(
        &self,
        vault_id: &VaultId,
        request: &SaveSnapshotRequest,
    ) -> Result<SaveSnapshotResponse> {
        self.send("POST", format!("/vaults/{vault_id}/snapshot"), Some(request))
            .await
    }

    pub async fn get_updates(&self, vault_id: &VaultId, query: &UpdatesQuery) -> Result<Vec<Update>> {
        let path = format!("/vaults/{vault_id}/updates{}", query.to_query_string());
        self.send::<(), _>("GET", path, None).await
    }

    pub async fn push_update(
        &self,
        vault_id: &VaultId,
        request: &PushUpdateRequest,
    ) -> Result<PushUpdateResponse> {
        self.send("POST", format!("/vaults/{vault_id}/updates"), Some(request))
            .await
    }

    pub async fn status(&self, vault_id: &VaultId) -> Result<SyncStatus> {
        self.send::<(), _>("GET", format!("/vaults/{vault_id}/status"), None)
            .await
    }

    pub async fn put_wrapped_key(
        &self,
        vault_id: &VaultId,
        request: &PutWrappedKeyRequest,
    ) -> Result<WrappedVaultKey> {
        self.send("PUT", format!("/vaults/{vault_id}/keys"), Some(request))
            .await
    }

    /// The caller's own wrapped key for the vault.
    pub async fn get_own_key(&self, vault_id: &VaultId) -> Result<WrappedVaultKey> {
        self.send::<(), _>("GET", format!("/vaults/{vault_id}/keys/self"), None)
            .await
    }

    pub async fn health(&self) -> Result<Value> {
        self.send::<(), _>("GET", "/health".to_string(), None).await
    }

    async fn send<B, T>(&self, method: &'static str, path: String, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        // Sign over the same Value that goes on the wire.
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SyncError::InvalidResponse(format!("request encoding: {e}")))?;
        let headers = self.session.sign_request(method, &path, body.as_ref())?;
        let bytes = body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| SyncError::InvalidResponse(format!("request encoding: {e}")))?;

        let request = RelayRequest {
            method,
            path,
            headers: headers
                .pairs()
                .iter()
                .map(|(name, value)| (*name, value.to_string()))
                .collect(),
            body: bytes,
        };
        let path = request.path.clone();
        let response = self.transport.execute(request).await?;

        if !response.is_success() {
            let err = error_from_response(&response);
            tracing::debug!(method, path = %path, status = response.status, error = %err, "relay error");
            return Err(err);
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::InvalidResponse(format!("{method} {path}: {e}")))
    }
}

/// Map a relay error response onto the client's error vocabulary.
fn error_from_response(response: &RelayResponse) -> SyncError {
    let body: Option<ErrorBody> = serde_json::from_slice(&response.body).ok();
    let (code, message) = match body {
        Some(ErrorBody { error, code }) => (code, error),
        None => (
            String::new(),
            String::from_utf8_lossy(&response.body).into_owned(),
        ),
    };
    match (response.status, code.as_str()) {
        (_, "version_conflict") => SyncError::VersionConflict,
        (_, "version_too_old") => SyncError::VersionTooOld,
        (404, _) => SyncError::NotFound(message),
        (401, _) => SyncError::Auth(if code.is_empty() { message } else { code }),
        (status, _) => SyncError::Relay {
            status,
            code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, code: &str) -> RelayResponse {
        RelayResponse {
            status,
            body: serde_json::to_vec(&ErrorBody {
                error: "something".into(),
                code: code.into(),
            })
            .unwrap(),
        }
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            error_from_response(&response(409, "version_conflict")),
            SyncError::VersionConflict
        ));
        assert!(matches!(
            error_from_response(&response(410, "version_too_old")),
            SyncError::VersionTooOld
        ));
        assert!(matches!(
            error_from_response(&response(404, "not_found")),
            SyncError::NotFound(_)
        ));
        match error_from_response(&response(401, "request_expired")) {
            SyncError::Auth(code) => assert_eq!(code, "request_expired"),
            other => panic!("unexpected {other:?}"),
        }
        match error_from_response(&response(403, "forbidden")) {
            SyncError::Relay { status, code, .. } => {
                assert_eq!(status, 403);
                assert_eq!(code, "forbidden");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_json_error_body() {
        let err = error_from_response(&RelayResponse {
            status: 502,
            body: b"Bad Gateway".to_vec(),
        });
        match err {
            SyncError::Relay { status, message, .. } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
