use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tally_shared::{PubkeyHash, VaultId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{row_to_vault, VaultRecord};

impl Database {
    /// Register a vault. Idempotent for the same owner; a different owner
    /// claiming an existing id gets `VaultExists`.
    pub fn create_vault(&self, id: &VaultId, owner: &PubkeyHash) -> Result<VaultRecord> {
        match self.get_vault(id) {
            Ok(existing) if existing.owner == *owner => return Ok(existing),
            Ok(_) => return Err(StoreError::VaultExists),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let record = VaultRecord {
            id: *id,
            owner: *owner,
            pruned_below_version: 0,
            pruned_through_seq: 0,
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO vaults (id, owner_hash, pruned_below_version, pruned_through_seq, created_at)
             VALUES (?1, ?2, 0, 0, ?3)",
            params![
                record.id.to_string(),
                record.owner.to_hex(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        tracing::info!(vault = %id, owner = %owner.short(), "vault registered");
        Ok(record)
    }

    pub fn get_vault(&self, id: &VaultId) -> Result<VaultRecord> {
        self.conn()
            .query_row(
                "SELECT id, owner_hash, pruned_below_version, pruned_through_seq, created_at
                 FROM vaults
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_vault,
            )
            .map_err(StoreError::from_query)
    }

    /// Owner, or the recipient of a wrapped key for this vault.
    pub fn is_member(&self, id: &VaultId, who: &PubkeyHash) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM vaults WHERE id = ?1 AND owner_hash = ?2
                 UNION ALL
                 SELECT 1 FROM wrapped_keys WHERE vault_id = ?1 AND recipient_hash = ?2
                 LIMIT 1",
                params![id.to_string(), who.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn vault_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM vaults", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent_for_owner() {
        let db = Database::open_in_memory().unwrap();
        let id = VaultId::new();
        let owner = PubkeyHash([1; 32]);

        let first = db.create_vault(&id, &owner).unwrap();
        let second = db.create_vault(&id, &owner).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.vault_count().unwrap(), 1);
    }

    #[test]
    fn test_create_rejects_other_owner() {
        let db = Database::open_in_memory().unwrap();
        let id = VaultId::new();
        db.create_vault(&id, &PubkeyHash([1; 32])).unwrap();

        assert!(matches!(
            db.create_vault(&id, &PubkeyHash([2; 32])),
            Err(StoreError::VaultExists)
        ));
    }

    #[test]
    fn test_missing_vault_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_vault(&VaultId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_owner_is_member_stranger_is_not() {
        let db = Database::open_in_memory().unwrap();
        let id = VaultId::new();
        let owner = PubkeyHash([1; 32]);
        db.create_vault(&id, &owner).unwrap();

        assert!(db.is_member(&id, &owner).unwrap());
        assert!(!db.is_member(&id, &PubkeyHash([9; 32])).unwrap());
        assert!(!db.is_member(&VaultId::new(), &owner).unwrap());
    }
}
