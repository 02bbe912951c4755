//! Asymmetric distribution of vault keys.
//!
//! Two modes:
//! - **wrap**: authenticated sender. X25519(sender_secret, recipient_public)
//!   feeds a BLAKE3 KDF; the vault key is sealed with XChaCha20-Poly1305.
//!   Blob layout: `nonce(24) || ciphertext || tag(16)`.
//! - **seal**: anonymous sender. A fresh ephemeral X25519 keypair replaces
//!   the sender; its public half is prepended.
//!   Blob layout: `eph_pub(32) || nonce(24) || ciphertext || tag(16)`.
//!
//! Failures after the length check are reported as a single opaque error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_KEY_SEAL, KDF_CONTEXT_KEY_WRAP, NONCE_SIZE, PUBKEY_SIZE, SYMMETRIC_KEY_SIZE,
    TAG_SIZE,
};
use crate::crypto::{decrypt, derive_key, encrypt};
use crate::error::KeyWrapError;
use crate::types::VaultKey;

const MIN_WRAPPED_LEN: usize = NONCE_SIZE + TAG_SIZE;
const MIN_SEALED_LEN: usize = PUBKEY_SIZE + NONCE_SIZE + TAG_SIZE;

fn check_key_size(vault_key: &[u8]) -> Result<&[u8; SYMMETRIC_KEY_SIZE], KeyWrapError> {
    vault_key
        .try_into()
        .map_err(|_| KeyWrapError::InvalidKeySize(vault_key.len()))
}

fn wrap_kek(shared: &SharedSecret, sender: &PublicKey, recipient: &PublicKey) -> [u8; 32] {
    derive_key(
        KDF_CONTEXT_KEY_WRAP,
        &[shared.as_bytes(), sender.as_bytes(), recipient.as_bytes()],
    )
}

fn seal_kek(shared: &SharedSecret, ephemeral: &PublicKey, owner: &PublicKey) -> [u8; 32] {
    derive_key(
        KDF_CONTEXT_KEY_SEAL,
        &[shared.as_bytes(), ephemeral.as_bytes(), owner.as_bytes()],
    )
}

pub fn wrap_key(
    vault_key: &[u8],
    recipient_public: &PublicKey,
    sender_secret: &StaticSecret,
) -> Result<Vec<u8>, KeyWrapError> {
    let key = check_key_size(vault_key)?;
    let shared = sender_secret.diffie_hellman(recipient_public);
    // low-order recipient point
    if !shared.was_contributory() {
        return Err(KeyWrapError::UnwrapFailed);
    }
    let sender_public = PublicKey::from(sender_secret);
    let kek = wrap_kek(&shared, &sender_public, recipient_public);
    encrypt(&kek, key, b"").map_err(|_| KeyWrapError::UnwrapFailed)
}

pub fn unwrap_key(
    blob: &[u8],
    sender_public: &PublicKey,
    recipient_secret: &StaticSecret,
) -> Result<VaultKey, KeyWrapError> {
    if blob.len() < MIN_WRAPPED_LEN {
        return Err(KeyWrapError::InvalidLength);
    }
    let shared = recipient_secret.diffie_hellman(sender_public);
    if !shared.was_contributory() {
        return Err(KeyWrapError::UnwrapFailed);
    }
    let recipient_public = PublicKey::from(recipient_secret);
    let kek = wrap_kek(&shared, sender_public, &recipient_public);
    let plain = decrypt(&kek, blob, b"").map_err(|_| KeyWrapError::UnwrapFailed)?;
    VaultKey::from_slice(&plain).map_err(|_| KeyWrapError::UnwrapFailed)
}

pub fn seal_key(vault_key: &[u8], owner_public: &PublicKey) -> Result<Vec<u8>, KeyWrapError> {
    let key = check_key_size(vault_key)?;
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(owner_public);
    if !shared.was_contributory() {
        return Err(KeyWrapError::UnsealFailed);
    }
    let kek = seal_kek(&shared, &ephemeral_public, owner_public);
    let sealed = encrypt(&kek, key, b"").map_err(|_| KeyWrapError::UnsealFailed)?;

    let mut output = Vec::with_capacity(PUBKEY_SIZE + sealed.len());
    output.extend_from_slice(ephemeral_public.as_bytes());
    output.extend_from_slice(&sealed);
    Ok(output)
}

pub fn unseal_key(
    blob: &[u8],
    owner_public: &PublicKey,
    owner_secret: &StaticSecret,
) -> Result<VaultKey, KeyWrapError> {
    if blob.len() < MIN_SEALED_LEN {
        return Err(KeyWrapError::InvalidLength);
    }
    let (eph_bytes, sealed) = blob.split_at(PUBKEY_SIZE);
    let eph_arr: [u8; PUBKEY_SIZE] = eph_bytes
        .try_into()
        .map_err(|_| KeyWrapError::InvalidLength)?;
    let ephemeral_public = PublicKey::from(eph_arr);

    let shared = owner_secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(KeyWrapError::UnsealFailed);
    }
    let kek = seal_kek(&shared, &ephemeral_public, owner_public);
    let plain = decrypt(&kek, sealed, b"").map_err(|_| KeyWrapError::UnsealFailed)?;
    VaultKey::from_slice(&plain).map_err(|_| KeyWrapError::UnsealFailed)
}

fn decode_b64(encoded: &str) -> Result<Vec<u8>, KeyWrapError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|_| KeyWrapError::InvalidEncoding)
}

pub fn wrap_key_b64(
    vault_key: &[u8],
    recipient_public: &PublicKey,
    sender_secret: &StaticSecret,
) -> Result<String, KeyWrapError> {
    wrap_key(vault_key, recipient_public, sender_secret).map(|blob| STANDARD.encode(blob))
}

pub fn unwrap_key_b64(
    encoded: &str,
    sender_public: &PublicKey,
    recipient_secret: &StaticSecret,
) -> Result<VaultKey, KeyWrapError> {
    unwrap_key(&decode_b64(encoded)?, sender_public, recipient_secret)
}

pub fn seal_key_b64(vault_key: &[u8], owner_public: &PublicKey) -> Result<String, KeyWrapError> {
    seal_key(vault_key, owner_public).map(|blob| STANDARD.encode(blob))
}

pub fn unseal_key_b64(
    encoded: &str,
    owner_public: &PublicKey,
    owner_secret: &StaticSecret,
) -> Result<VaultKey, KeyWrapError> {
    unseal_key(&decode_b64(encoded)?, owner_public, owner_secret)
}
