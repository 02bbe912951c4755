//! Vault key distribution over the relay.
//!
//! The owner seals the key for themselves; members wrap it for invitees.
//! The relay only ever stores wrapped blobs.

use tally_shared::identity::encryption_public_from_b64;
use tally_shared::keywrap::{seal_key_b64, unseal_key_b64, unwrap_key_b64, wrap_key_b64};
use tally_shared::protocol::{PutWrappedKeyRequest, WrappedVaultKey};
use tally_shared::{PubkeyHash, VaultId, VaultKey};
use tracing::{debug, info};
use x25519_dalek::PublicKey;

use crate::error::{Result, SyncError};
use crate::relay_client::RelayClient;
use crate::session::Session;

/// Register `vault_id` with the caller as owner and give it a key.
///
/// Safe to repeat: if the owner already has a key on record, that key is
/// returned instead of minting a new one.
pub async fn create_vault(relay: &RelayClient, vault_id: &VaultId) -> Result<VaultKey> {
    let info = relay.create_vault(vault_id).await?;

    match relay.get_own_key(vault_id).await {
        Ok(existing) => {
            debug!(vault = %vault_id, "vault already has a key, reusing it");
            return open_wrapped_key(relay.session(), &existing);
        }
        Err(SyncError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let key = VaultKey::generate();
    let (owner, sealed) = relay.session().with_identity(|id| {
        let sealed = seal_key_b64(key.as_bytes(), &id.encryption_public())?;
        Ok((id.pubkey_hash(), sealed))
    })?;
    relay
        .put_wrapped_key(
            vault_id,
            &PutWrappedKeyRequest {
                recipient_pubkey_hash: owner,
                wrapped_key_b64: sealed,
                sender_pubkey_b64: None,
            },
        )
        .await?;

    info!(vault = %vault_id, owner = %info.owner_pubkey_hash.short(), "vault created");
    Ok(key)
}

/// Wrap `vault_key` for another user and store it on the relay. Grants them
/// membership.
pub async fn invite(
    relay: &RelayClient,
    vault_id: &VaultId,
    vault_key: &VaultKey,
    recipient: PubkeyHash,
    recipient_public: &PublicKey,
) -> Result<WrappedVaultKey> {
    let (wrapped, sender) = relay.session().with_identity(|id| {
        let wrapped = wrap_key_b64(vault_key.as_bytes(), recipient_public, id.encryption_secret())?;
        Ok((wrapped, id.encryption_public_b64()))
    })?;
    let stored = relay
        .put_wrapped_key(
            vault_id,
            &PutWrappedKeyRequest {
                recipient_pubkey_hash: recipient,
                wrapped_key_b64: wrapped,
                sender_pubkey_b64: Some(sender),
            },
        )
        .await?;
    info!(vault = %vault_id, recipient = %recipient.short(), "member invited");
    Ok(stored)
}

/// Fetch and open the caller's own key record.
pub async fn join_vault(relay: &RelayClient, vault_id: &VaultId) -> Result<VaultKey> {
    let record = relay.get_own_key(vault_id).await?;
    let key = open_wrapped_key(relay.session(), &record)?;
    info!(vault = %vault_id, "joined vault");
    Ok(key)
}

/// Unwrap (invited) or unseal (owner) a stored key.
pub fn open_wrapped_key(session: &Session, record: &WrappedVaultKey) -> Result<VaultKey> {
    session.with_identity(|id| match &record.sender_pubkey_b64 {
        Some(sender) => {
            let sender = encryption_public_from_b64(sender)?;
            Ok(unwrap_key_b64(
                &record.wrapped_key_b64,
                &sender,
                id.encryption_secret(),
            )?)
        }
        None => Ok(unseal_key_b64(
            &record.wrapped_key_b64,
            &id.encryption_public(),
            id.encryption_secret(),
        )?),
    })
}
