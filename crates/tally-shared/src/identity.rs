use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_ENCRYPTION_KEY, KDF_CONTEXT_SIGNING_KEY, PUBKEY_SIZE};
use crate::crypto::derive_key;
use crate::error::IdentityError;
use crate::mnemonic::{derive_master_seed, MasterSeed};
use crate::types::PubkeyHash;

/// A user's cryptographic root: an Ed25519 signing keypair and an X25519
/// encryption keypair, both derived from the recovery phrase.
///
/// Nothing here is ever persisted. The secret halves zeroize on drop.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    encryption_key: StaticSecret,
}

/// Deterministic: the same master seed always yields the same keys.
pub fn derive_identity(master_seed: &MasterSeed) -> Identity {
    let signing_seed = derive_key(KDF_CONTEXT_SIGNING_KEY, &[master_seed]);
    let encryption_seed = derive_key(KDF_CONTEXT_ENCRYPTION_KEY, &[master_seed]);
    Identity {
        signing_key: SigningKey::from_bytes(&signing_seed),
        encryption_key: StaticSecret::from(encryption_seed),
    }
}

/// BLAKE3 of the signing public key. Used as the user id everywhere.
pub fn compute_pubkey_hash(signing_public: &[u8; PUBKEY_SIZE]) -> PubkeyHash {
    PubkeyHash(*blake3::hash(signing_public).as_bytes())
}

impl Identity {
    pub fn from_phrase(phrase: &str) -> Result<Self, IdentityError> {
        let seed = derive_master_seed(phrase)?;
        Ok(derive_identity(&seed))
    }

    pub fn pubkey_hash(&self) -> PubkeyHash {
        compute_pubkey_hash(&self.signing_public_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn signing_public_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn signing_public_b64(&self) -> String {
        STANDARD.encode(self.signing_public_bytes())
    }

    pub fn encryption_public(&self) -> PublicKey {
        PublicKey::from(&self.encryption_key)
    }

    pub fn encryption_public_b64(&self) -> String {
        STANDARD.encode(self.encryption_public().as_bytes())
    }

    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption_key
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("pubkey_hash", &self.pubkey_hash().short())
            .finish_non_exhaustive()
    }
}

/// Parse a base64 X25519 public key as carried on the wire.
pub fn encryption_public_from_b64(encoded: &str) -> Result<PublicKey, IdentityError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| IdentityError::InvalidKeyBytes)?;
    let arr: [u8; PUBKEY_SIZE] = bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyBytes)?;
    Ok(PublicKey::from(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic::generate_recovery_phrase;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon about";

    #[test]
    fn test_derivation_is_deterministic() {
        let a = Identity::from_phrase(PHRASE).unwrap();
        let b = Identity::from_phrase(PHRASE).unwrap();
        assert_eq!(a.signing_public_bytes(), b.signing_public_bytes());
        assert_eq!(a.encryption_public(), b.encryption_public());
        assert_eq!(a.pubkey_hash(), b.pubkey_hash());
    }

    #[test]
    fn test_different_phrases_different_identities() {
        let a = Identity::from_phrase(PHRASE).unwrap();
        let b = Identity::from_phrase(&generate_recovery_phrase()).unwrap();
        assert_ne!(a.pubkey_hash(), b.pubkey_hash());
    }

    #[test]
    fn test_signing_and_encryption_keys_are_separated() {
        let id = Identity::from_phrase(PHRASE).unwrap();
        assert_ne!(
            id.signing_public_bytes(),
            *id.encryption_public().as_bytes()
        );
    }

    #[test]
    fn test_pubkey_hash_is_blake3_of_signing_key() {
        let id = Identity::from_phrase(PHRASE).unwrap();
        let expected = blake3::hash(&id.signing_public_bytes());
        assert_eq!(id.pubkey_hash().0, *expected.as_bytes());
        assert_eq!(id.pubkey_hash().to_hex().len(), 64);
    }

    #[test]
    fn test_invalid_phrase_rejected() {
        assert!(matches!(
            Identity::from_phrase("one two three"),
            Err(IdentityError::InvalidPhrase)
        ));
    }

    #[test]
    fn test_encryption_public_b64_roundtrip() {
        let id = Identity::from_phrase(PHRASE).unwrap();
        let parsed = encryption_public_from_b64(&id.encryption_public_b64()).unwrap();
        assert_eq!(parsed, id.encryption_public());
        assert!(encryption_public_from_b64("AAAA").is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let id = Identity::from_phrase(PHRASE).unwrap();
        let rendered = format!("{id:?}");
        assert!(rendered.starts_with("Identity"));
        assert!(!rendered.contains(&hex::encode(id.encryption_secret().to_bytes())));
    }
}
