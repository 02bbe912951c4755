//! Snapshot storage, version rules and retention pruning.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tally_shared::protocol::{Snapshot, SyncStatus};
use tally_shared::VaultId;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_hlc, col_time, col_u64, col_vault_id, NewSnapshot};

const SNAPSHOT_COLUMNS: &str =
    "id, vault_id, version, hlc, encrypted_data, through_seq, created_at";

/// Version of the newest snapshot, 0 when the vault has none.
pub(crate) fn latest_version(conn: &Connection, vault: &VaultId) -> Result<u64> {
    let v: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM snapshots WHERE vault_id = ?1",
        params![vault.to_string()],
        |row| row.get(0),
    )?;
    Ok(v as u64)
}

pub(crate) fn max_seq(conn: &Connection, vault: &VaultId) -> Result<u64> {
    let v: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM updates WHERE vault_id = ?1",
        params![vault.to_string()],
        |row| row.get(0),
    )?;
    Ok(v as u64)
}

fn latest(conn: &Connection, vault: &VaultId) -> Result<Option<Snapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
         WHERE vault_id = ?1
         ORDER BY version DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![vault.to_string()], row_to_snapshot)
        .optional()?)
}

impl Database {
    pub fn latest_snapshot(&self, vault: &VaultId) -> Result<Option<Snapshot>> {
        latest(self.conn(), vault)
    }

    /// Store a snapshot. `version` must exceed the current latest, and
    /// `through_seq` cannot claim updates the relay has not seen.
    ///
    /// With `retention > 0`, only the newest `retention` snapshots are kept and
    /// updates folded into the oldest kept one are deleted.
    pub fn save_snapshot(
        &mut self,
        vault: &VaultId,
        snapshot: &NewSnapshot,
        retention: usize,
    ) -> Result<Snapshot> {
        self.get_vault(vault)?;

        let tx = self.conn_mut().transaction()?;

        let current = latest_version(&tx, vault)?;
        if snapshot.version <= current {
            return Err(StoreError::VersionConflict { latest: current });
        }
        let seen = max_seq(&tx, vault)?;
        if snapshot.through_seq > seen {
            return Err(StoreError::Invalid(format!(
                "throughSeq {} is beyond the last update ({seen})",
                snapshot.through_seq
            )));
        }

        let stored = Snapshot {
            id: Uuid::new_v4().to_string(),
            vault_id: *vault,
            version: snapshot.version,
            hlc_timestamp: snapshot.hlc.clone(),
            encrypted_data: snapshot.encrypted_data.clone(),
            through_seq: snapshot.through_seq,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO snapshots (id, vault_id, version, hlc, encrypted_data, through_seq, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stored.id,
                vault.to_string(),
                stored.version as i64,
                stored.hlc_timestamp.to_string(),
                stored.encrypted_data,
                stored.through_seq as i64,
                stored.created_at.to_rfc3339(),
            ],
        )?;

        if retention > 0 {
            prune(&tx, vault, retention)?;
        }

        tx.commit()?;
        tracing::debug!(
            vault = %vault,
            version = stored.version,
            through_seq = stored.through_seq,
            "snapshot saved"
        );
        Ok(stored)
    }

    pub fn sync_status(&self, vault: &VaultId) -> Result<SyncStatus> {
        let snapshot = self.latest_snapshot(vault)?;
        let folded = snapshot.as_ref().map_or(0, |s| s.through_seq);
        let pending: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM updates WHERE vault_id = ?1 AND seq > ?2",
            params![vault.to_string(), folded as i64],
            |row| row.get(0),
        )?;

        Ok(SyncStatus {
            has_snapshot: snapshot.is_some(),
            latest_snapshot_id: snapshot.as_ref().map(|s| s.id.clone()),
            latest_snapshot_version: snapshot.as_ref().map_or(0, |s| s.version),
            latest_snapshot_hlc: snapshot.as_ref().map(|s| s.hlc_timestamp.clone()),
            latest_snapshot_at: snapshot.as_ref().map(|s| s.created_at),
            pending_update_count: pending as u64,
        })
    }
}

/// Keep the newest `keep` snapshots; drop older ones and the updates folded
/// into the oldest survivor, then record the new horizon on the vault.
fn prune(conn: &Connection, vault: &VaultId, keep: usize) -> Result<()> {
    let horizon: Option<(i64, i64)> = conn
        .query_row(
            "SELECT version, through_seq FROM snapshots
             WHERE vault_id = ?1
             ORDER BY version DESC
             LIMIT 1 OFFSET ?2",
            params![vault.to_string(), (keep - 1) as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((version, through_seq)) = horizon else {
        return Ok(());
    };

    let snapshots = conn.execute(
        "DELETE FROM snapshots WHERE vault_id = ?1 AND version < ?2",
        params![vault.to_string(), version],
    )?;
    let updates = conn.execute(
        "DELETE FROM updates WHERE vault_id = ?1 AND seq <= ?2",
        params![vault.to_string(), through_seq],
    )?;
    conn.execute(
        "UPDATE vaults SET pruned_below_version = ?2, pruned_through_seq = MAX(pruned_through_seq, ?3)
         WHERE id = ?1",
        params![vault.to_string(), version, through_seq],
    )?;

    if snapshots > 0 || updates > 0 {
        tracing::info!(
            vault = %vault,
            horizon_version = version,
            snapshots,
            updates,
            "pruned folded history"
        );
    }
    Ok(())
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        vault_id: col_vault_id(row, 1)?,
        version: col_u64(row, 2)?,
        hlc_timestamp: col_hlc(row, 3)?,
        encrypted_data: row.get(4)?,
        through_seq: col_u64(row, 5)?,
        created_at: col_time(row, 6)?,
    })
}
