//! What goes inside the encrypted envelope.
//!
//! Blobs are self-describing: the receiver learns whether it holds a
//! snapshot or a delta from the decrypted payload, not from relay metadata.

use serde::{Deserialize, Serialize};
use tally_shared::crypto::{decrypt_payload, encrypt_payload};
use tally_shared::{VaultId, VaultKey};

use crate::document::{ExportKind, ExportedState};
use crate::error::{CodecError, SyncError};

/// Bumped if the payload layout ever changes.
pub const PAYLOAD_FORMAT: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub format: u8,
    pub kind: ExportKind,
    pub data: Vec<u8>,
}

impl From<ExportedState> for SyncPayload {
    fn from(state: ExportedState) -> Self {
        Self {
            format: PAYLOAD_FORMAT,
            kind: state.kind,
            data: state.data,
        }
    }
}

impl SyncPayload {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let payload: SyncPayload =
            bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if payload.format != PAYLOAD_FORMAT {
            return Err(CodecError::Decode(format!(
                "unsupported payload format {}",
                payload.format
            )));
        }
        Ok(payload)
    }
}

/// Encode and encrypt for the wire. Returns base64.
pub fn seal_payload(
    state: ExportedState,
    key: &VaultKey,
    vault_id: &VaultId,
) -> Result<String, SyncError> {
    let plaintext = SyncPayload::from(state).encode()?;
    Ok(encrypt_payload(key, vault_id, &plaintext)?)
}

/// Decrypt and decode a wire blob. Authentication failure is a
/// `CorruptPayload`: the blob was tampered with, or sealed under another
/// key or for another vault.
pub fn open_payload(
    encrypted: &str,
    key: &VaultKey,
    vault_id: &VaultId,
) -> Result<SyncPayload, SyncError> {
    let plaintext = decrypt_payload(key, vault_id, encrypted)
        .map_err(|e| SyncError::CorruptPayload(e.to_string()))?;
    Ok(SyncPayload::decode(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Record, VaultDocument};

    fn state() -> ExportedState {
        let doc = VaultDocument::new();
        doc.upsert_record("accounts", &Record::new("acc1").with_field("name", "Cash"))
            .unwrap();
        doc.export_updates_safe(None)
    }

    #[test]
    fn test_seal_and_open() {
        let key = VaultKey::generate();
        let vault = VaultId::new();
        let sealed = seal_payload(state(), &key, &vault).unwrap();

        let opened = open_payload(&sealed, &key, &vault).unwrap();
        assert_eq!(opened.kind, ExportKind::Snapshot);
        let doc = VaultDocument::from_bytes(&opened.data).unwrap();
        assert!(doc.get_record("accounts", "acc1").is_some());
    }

    #[test]
    fn test_wrong_key_or_vault_is_corrupt() {
        let key = VaultKey::generate();
        let vault = VaultId::new();
        let sealed = seal_payload(state(), &key, &vault).unwrap();

        assert!(matches!(
            open_payload(&sealed, &VaultKey::generate(), &vault),
            Err(SyncError::CorruptPayload(_))
        ));
        assert!(matches!(
            open_payload(&sealed, &key, &VaultId::new()),
            Err(SyncError::CorruptPayload(_))
        ));
        assert!(matches!(
            open_payload("not base64!", &key, &vault),
            Err(SyncError::CorruptPayload(_))
        ));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let payload = SyncPayload {
            format: 9,
            kind: ExportKind::Updates,
            data: vec![0, 0],
        };
        let bytes = bincode::serialize(&payload).unwrap();
        assert!(matches!(
            SyncPayload::decode(&bytes),
            Err(CodecError::Decode(_))
        ));
        assert!(SyncPayload::decode(&[1]).is_err());
    }
}
