use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tally_shared::protocol::WrappedVaultKey;
use tally_shared::{PubkeyHash, VaultId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_hash, col_time, col_vault_id, NewWrappedKey};

impl Database {
    /// Store the wrapped vault key for one recipient on behalf of `caller`.
    ///
    /// Only the owner writes the owner's record. An existing record may be
    /// replaced by its recipient or by the owner, nobody else.
    pub fn put_wrapped_key(
        &self,
        vault: &VaultId,
        key: &NewWrappedKey,
        caller: &PubkeyHash,
    ) -> Result<WrappedVaultKey> {
        let owner = self.get_vault(vault)?.owner;
        let is_owner = *caller == owner;
        if key.recipient == owner && !is_owner {
            return Err(StoreError::NotPermitted(
                "only the owner may store the owner's key".into(),
            ));
        }
        if !is_owner && *caller != key.recipient && self.has_wrapped_key(vault, &key.recipient)? {
            return Err(StoreError::NotPermitted(format!(
                "key for {} already exists",
                key.recipient.short()
            )));
        }

        let record = WrappedVaultKey {
            vault_id: *vault,
            recipient_pubkey_hash: key.recipient,
            wrapped_key_b64: key.wrapped_key_b64.clone(),
            sender_pubkey_b64: key.sender_pubkey_b64.clone(),
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO wrapped_keys (vault_id, recipient_hash, wrapped_key, sender_pubkey, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (vault_id, recipient_hash) DO UPDATE SET
                wrapped_key = excluded.wrapped_key,
                sender_pubkey = excluded.sender_pubkey,
                created_at = excluded.created_at",
            params![
                vault.to_string(),
                record.recipient_pubkey_hash.to_hex(),
                record.wrapped_key_b64,
                record.sender_pubkey_b64,
                record.created_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(
            vault = %vault,
            recipient = %key.recipient.short(),
            sealed = key.sender_pubkey_b64.is_none(),
            "wrapped key stored"
        );
        Ok(record)
    }

    pub fn get_wrapped_key(&self, vault: &VaultId, recipient: &PubkeyHash) -> Result<WrappedVaultKey> {
        self.conn()
            .query_row(
                "SELECT vault_id, recipient_hash, wrapped_key, sender_pubkey, created_at
                 FROM wrapped_keys
                 WHERE vault_id = ?1 AND recipient_hash = ?2",
                params![vault.to_string(), recipient.to_hex()],
                row_to_wrapped_key,
            )
            .map_err(StoreError::from_query)
    }

    fn has_wrapped_key(&self, vault: &VaultId, recipient: &PubkeyHash) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM wrapped_keys WHERE vault_id = ?1 AND recipient_hash = ?2",
                params![vault.to_string(), recipient.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn row_to_wrapped_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<WrappedVaultKey> {
    Ok(WrappedVaultKey {
        vault_id: col_vault_id(row, 0)?,
        recipient_pubkey_hash: col_hash(row, 1)?,
        wrapped_key_b64: row.get(2)?,
        sender_pubkey_b64: row.get(3)?,
        created_at: col_time(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: PubkeyHash = PubkeyHash([1; 32]);
    const FRIEND: PubkeyHash = PubkeyHash([2; 32]);
    const OTHER: PubkeyHash = PubkeyHash([3; 32]);

    fn setup() -> (Database, VaultId) {
        let db = Database::open_in_memory().unwrap();
        let vault = VaultId::new();
        db.create_vault(&vault, &OWNER).unwrap();
        (db, vault)
    }

    fn key_for(recipient: PubkeyHash, blob: &str) -> NewWrappedKey {
        NewWrappedKey {
            recipient,
            wrapped_key_b64: blob.into(),
            sender_pubkey_b64: Some("c2VuZGVy".into()),
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let (db, vault) = setup();
        let stored = db
            .put_wrapped_key(
                &vault,
                &NewWrappedKey {
                    recipient: OWNER,
                    wrapped_key_b64: "c2VhbGVk".into(),
                    sender_pubkey_b64: None,
                },
                &OWNER,
            )
            .unwrap();

        let fetched = db.get_wrapped_key(&vault, &OWNER).unwrap();
        assert_eq!(fetched, stored);
        assert!(fetched.sender_pubkey_b64.is_none());
    }

    #[test]
    fn test_recipient_becomes_member() {
        let (db, vault) = setup();
        assert!(!db.is_member(&vault, &FRIEND).unwrap());

        db.put_wrapped_key(&vault, &key_for(FRIEND, "d3JhcHBlZA=="), &OWNER)
            .unwrap();

        assert!(db.is_member(&vault, &FRIEND).unwrap());
        assert_eq!(
            db.get_wrapped_key(&vault, &FRIEND).unwrap().wrapped_key_b64,
            "d3JhcHBlZA=="
        );
    }

    #[test]
    fn test_owner_and_recipient_may_replace() {
        let (db, vault) = setup();
        db.put_wrapped_key(&vault, &key_for(FRIEND, "Zmlyc3Q="), &OWNER)
            .unwrap();
        db.put_wrapped_key(&vault, &key_for(FRIEND, "c2Vjb25k"), &OWNER)
            .unwrap();
        db.put_wrapped_key(&vault, &key_for(FRIEND, "dGhpcmQ="), &FRIEND)
            .unwrap();
        assert_eq!(
            db.get_wrapped_key(&vault, &FRIEND).unwrap().wrapped_key_b64,
            "dGhpcmQ="
        );
    }

    #[test]
    fn test_members_cannot_replace_others_keys() {
        let (db, vault) = setup();
        db.put_wrapped_key(&vault, &key_for(OWNER, "b3duZXI="), &OWNER)
            .unwrap();
        db.put_wrapped_key(&vault, &key_for(FRIEND, "ZnJpZW5k"), &OWNER)
            .unwrap();
        db.put_wrapped_key(&vault, &key_for(OTHER, "b3RoZXI="), &FRIEND)
            .unwrap();

        assert!(matches!(
            db.put_wrapped_key(&vault, &key_for(OWNER, "Ym9ndXM="), &FRIEND),
            Err(StoreError::NotPermitted(_))
        ));
        assert!(matches!(
            db.put_wrapped_key(&vault, &key_for(OTHER, "Ym9ndXM="), &FRIEND),
            Err(StoreError::NotPermitted(_))
        ));
        assert_eq!(
            db.get_wrapped_key(&vault, &OWNER).unwrap().wrapped_key_b64,
            "b3duZXI="
        );
        assert_eq!(
            db.get_wrapped_key(&vault, &OTHER).unwrap().wrapped_key_b64,
            "b3RoZXI="
        );
    }

    #[test]
    fn test_owner_record_is_owner_only_even_when_absent() {
        let (db, vault) = setup();
        db.put_wrapped_key(&vault, &key_for(FRIEND, "ZnJpZW5k"), &OWNER)
            .unwrap();
        assert!(matches!(
            db.put_wrapped_key(&vault, &key_for(OWNER, "Ym9ndXM="), &FRIEND),
            Err(StoreError::NotPermitted(_))
        ));
        assert!(matches!(
            db.get_wrapped_key(&vault, &OWNER),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let (db, vault) = setup();
        assert!(matches!(
            db.get_wrapped_key(&vault, &FRIEND),
            Err(StoreError::NotFound)
        ));
    }
}
