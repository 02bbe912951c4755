//! Vault sync endpoints. Every handler here runs behind
//! [`require_signature`](crate::auth::require_signature).

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::de::DeserializeOwned;
use tally_shared::protocol::{
    CreateVaultRequest, PushUpdateRequest, PushUpdateResponse, PutWrappedKeyRequest,
    SaveSnapshotRequest, SaveSnapshotResponse, Snapshot, SyncStatus, Update, UpdatesQuery,
    VaultInfo, WrappedVaultKey,
};
use tally_shared::{PubkeyHash, VaultId};
use tally_store::{Database, NewSnapshot, NewUpdate, NewWrappedKey, StoreError};
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthenticatedCaller;
use crate::error::ServerError;

fn parse_vault_id(raw: &str) -> Result<VaultId, ServerError> {
    Uuid::parse_str(raw)
        .map(VaultId)
        .map_err(|_| ServerError::BadRequest(format!("vaultId is not a UUID: {raw}")))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ServerError> {
    serde_json::from_slice(body).map_err(|e| ServerError::BadRequest(e.to_string()))
}

/// Owner or wrapped-key recipient; everyone else is refused.
fn authorize(db: &Database, vault: &VaultId, caller: &PubkeyHash) -> Result<(), ServerError> {
    match db.get_vault(vault) {
        Ok(_) => {}
        Err(StoreError::NotFound) => {
            return Err(ServerError::NotFound(format!("vault {vault}")));
        }
        Err(e) => return Err(e.into()),
    }
    if !db.is_member(vault, caller)? {
        return Err(ServerError::Forbidden("not a member of this vault".into()));
    }
    Ok(())
}

pub async fn create_vault(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    body: Bytes,
) -> Result<(StatusCode, Json<VaultInfo>), ServerError> {
    let req: CreateVaultRequest = parse_body(&body)?;
    let record = state.db.lock().await.create_vault(&req.vault_id, &caller)?;
    Ok((StatusCode::CREATED, Json(record.info())))
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
) -> Result<Json<Option<Snapshot>>, ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    Ok(Json(db.latest_snapshot(&vault)?))
}

pub async fn save_snapshot(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<SaveSnapshotResponse>), ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let req: SaveSnapshotRequest = parse_body(&body)?;
    req.validate()?;

    let mut db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    let stored = db.save_snapshot(
        &vault,
        &NewSnapshot {
            version: req.version,
            hlc: req.hlc_timestamp,
            encrypted_data: req.encrypted_data,
            through_seq: req.through_seq,
        },
        state.config.snapshot_retention,
    )?;

    info!(vault = %vault, version = stored.version, by = %caller.short(), "snapshot saved");
    Ok((
        StatusCode::CREATED,
        Json(SaveSnapshotResponse {
            snapshot_id: stored.id,
        }),
    ))
}

pub async fn get_updates(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
    query: Result<Query<UpdatesQuery>, QueryRejection>,
) -> Result<Json<Vec<Update>>, ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let limit = query.effective_limit()?;

    let db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    Ok(Json(db.list_updates(&vault, query.since, query.after, limit)?))
}

pub async fn push_update(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<PushUpdateResponse>), ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let req: PushUpdateRequest = parse_body(&body)?;
    req.validate()?;

    let mut db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    let (update_id, seq) = db.push_update(
        &vault,
        &NewUpdate {
            base_snapshot_version: req.base_snapshot_version,
            hlc: req.hlc_timestamp,
            author: caller,
            encrypted_data: req.encrypted_data,
        },
    )?;

    Ok((StatusCode::CREATED, Json(PushUpdateResponse { update_id, seq })))
}

pub async fn sync_status(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
) -> Result<Json<SyncStatus>, ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    Ok(Json(db.sync_status(&vault)?))
}

pub async fn put_wrapped_key(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
    body: Bytes,
) -> Result<Json<WrappedVaultKey>, ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let req: PutWrappedKeyRequest = parse_body(&body)?;
    req.validate()?;

    let db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    let stored = db.put_wrapped_key(
        &vault,
        &NewWrappedKey {
            recipient: req.recipient_pubkey_hash,
            wrapped_key_b64: req.wrapped_key_b64,
            sender_pubkey_b64: req.sender_pubkey_b64,
        },
        &caller,
    )?;

    info!(
        vault = %vault,
        recipient = %stored.recipient_pubkey_hash.short(),
        by = %caller.short(),
        "wrapped key stored"
    );
    Ok(Json(stored))
}

pub async fn get_own_key(
    State(state): State<AppState>,
    Extension(AuthenticatedCaller(caller)): Extension<AuthenticatedCaller>,
    Path(vault_id): Path<String>,
) -> Result<Json<WrappedVaultKey>, ServerError> {
    let vault = parse_vault_id(&vault_id)?;
    let db = state.db.lock().await;
    authorize(&db, &vault, &caller)?;
    match db.get_wrapped_key(&vault, &caller) {
        Ok(key) => Ok(Json(key)),
        Err(StoreError::NotFound) => Err(ServerError::NotFound("no wrapped key for caller".into())),
        Err(e) => Err(e.into()),
    }
}
