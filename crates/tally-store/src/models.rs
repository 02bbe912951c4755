//! Rows persisted by the relay, and the insert parameters for them.
//!
//! Read paths hand back the wire types from `tally_shared::protocol`
//! directly; only vault metadata has a relay-private shape.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use tally_shared::hlc::Hlc;
use tally_shared::protocol::VaultInfo;
use tally_shared::{PubkeyHash, VaultId};
use uuid::Uuid;

/// A registered vault and its retention horizon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub id: VaultId,
    pub owner: PubkeyHash,
    /// Snapshots older than this version have been pruned.
    pub pruned_below_version: u64,
    /// Updates with `seq <= pruned_through_seq` have been pruned.
    pub pruned_through_seq: u64,
    pub created_at: DateTime<Utc>,
}

impl VaultRecord {
    pub fn info(&self) -> VaultInfo {
        VaultInfo {
            vault_id: self.id,
            owner_pubkey_hash: self.owner,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub version: u64,
    pub hlc: Hlc,
    pub encrypted_data: String,
    pub through_seq: u64,
}

#[derive(Debug, Clone)]
pub struct NewUpdate {
    pub base_snapshot_version: u64,
    pub hlc: Hlc,
    pub author: PubkeyHash,
    pub encrypted_data: String,
}

#[derive(Debug, Clone)]
pub struct NewWrappedKey {
    pub recipient: PubkeyHash,
    pub wrapped_key_b64: String,
    pub sender_pubkey_b64: Option<String>,
}

// Column decoders shared by the row mappers.

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn col_vault_id(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<VaultId> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map(VaultId)
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_hash(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<PubkeyHash> {
    let s: String = row.get(idx)?;
    PubkeyHash::from_hex(&s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_hlc(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Hlc> {
    let s: String = row.get(idx)?;
    s.parse::<Hlc>().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_u64(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    Ok(v.max(0) as u64)
}

pub(crate) fn row_to_vault(row: &rusqlite::Row<'_>) -> rusqlite::Result<VaultRecord> {
    Ok(VaultRecord {
        id: col_vault_id(row, 0)?,
        owner: col_hash(row, 1)?,
        pruned_below_version: col_u64(row, 2)?,
        pruned_through_seq: col_u64(row, 3)?,
        created_at: col_time(row, 4)?,
    })
}
