use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::types::{VaultId, VaultKey};

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext || tag (24 bytes nonce prepended)
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal a sync payload for the relay. The vault id is bound as associated
/// data, so a blob replayed into another vault fails authentication.
pub fn encrypt_payload(
    key: &VaultKey,
    vault_id: &VaultId,
    plaintext: &[u8],
) -> Result<String, CryptoError> {
    let sealed = encrypt(key.as_bytes(), plaintext, vault_id.as_aad())?;
    Ok(STANDARD.encode(sealed))
}

pub fn decrypt_payload(
    key: &VaultKey,
    vault_id: &VaultId,
    encoded: &str,
) -> Result<Vec<u8>, CryptoError> {
    let sealed = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::DecryptionFailed)?;
    decrypt(key.as_bytes(), &sealed, vault_id.as_aad())
}

// BLAKE3 KDF with domain separation
pub fn derive_key(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
