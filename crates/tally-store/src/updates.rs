use chrono::Utc;
use rusqlite::params;
use tally_shared::protocol::Update;
use tally_shared::VaultId;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_hash, col_hlc, col_time, col_u64, col_vault_id, NewUpdate};
use crate::snapshots::latest_version;

impl Database {
    /// Append an update. Its base must be the latest snapshot version (0 when
    /// none), otherwise the pusher is behind and gets `VersionConflict`.
    ///
    /// Returns `(update_id, seq)`.
    pub fn push_update(&mut self, vault: &VaultId, update: &NewUpdate) -> Result<(String, u64)> {
        self.get_vault(vault)?;

        let tx = self.conn_mut().transaction()?;
        let latest = latest_version(&tx, vault)?;
        if update.base_snapshot_version != latest {
            return Err(StoreError::VersionConflict { latest });
        }

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO updates (id, vault_id, base_snapshot_version, hlc, author_hash, encrypted_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                vault.to_string(),
                update.base_snapshot_version as i64,
                update.hlc.to_string(),
                update.author.to_hex(),
                update.encrypted_data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let seq = tx.last_insert_rowid() as u64;
        tx.commit()?;

        tracing::debug!(vault = %vault, seq, author = %update.author.short(), "update stored");
        Ok((id, seq))
    }

    /// Updates in arrival order. `since` keeps those based on at least that
    /// snapshot version; `after` keeps those with a greater `seq`.
    ///
    /// Fails with `VersionTooOld` when the range reaches below the retention
    /// horizon, since the answer would silently miss pruned history.
    pub fn list_updates(
        &self,
        vault: &VaultId,
        since: Option<u64>,
        after: Option<u64>,
        limit: u32,
    ) -> Result<Vec<Update>> {
        let record = self.get_vault(vault)?;
        let after_too_old = after.is_some_and(|a| a < record.pruned_through_seq);
        let since_too_old = since.is_some_and(|s| s < record.pruned_below_version);
        let unbounded = since.is_none() && after.is_none() && record.pruned_through_seq > 0;
        if after_too_old || since_too_old || unbounded {
            return Err(StoreError::VersionTooOld {
                horizon: record.pruned_below_version,
            });
        }

        let mut stmt = self.conn().prepare(
            "SELECT id, seq, vault_id, base_snapshot_version, hlc, author_hash, encrypted_data, created_at
             FROM updates
             WHERE vault_id = ?1 AND seq > ?2 AND base_snapshot_version >= ?3
             ORDER BY seq ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                vault.to_string(),
                after.unwrap_or(0) as i64,
                since.unwrap_or(0) as i64,
                limit as i64,
            ],
            row_to_update,
        )?;

        let mut updates = Vec::new();
        for row in rows {
            updates.push(row?);
        }
        Ok(updates)
    }
}

fn row_to_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<Update> {
    Ok(Update {
        id: row.get(0)?,
        seq: col_u64(row, 1)?,
        vault_id: col_vault_id(row, 2)?,
        base_snapshot_version: col_u64(row, 3)?,
        hlc_timestamp: col_hlc(row, 4)?,
        author_pubkey_hash: col_hash(row, 5)?,
        encrypted_data: row.get(6)?,
        created_at: col_time(row, 7)?,
    })
}
