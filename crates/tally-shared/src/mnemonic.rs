//! Recovery phrases and master-seed derivation.
//!
//! A recovery phrase is a 12-word BIP-39 mnemonic (128 bits of entropy plus a
//! 4-bit checksum). The master seed is the standard BIP-39 seed: PBKDF2 with
//! HMAC-SHA512, 2048 rounds, empty passphrase.

use bip39::{Language, Mnemonic};
use rand::RngCore;

use crate::constants::{MASTER_SEED_SIZE, PHRASE_ENTROPY_SIZE, PHRASE_WORD_COUNT};
use crate::error::IdentityError;

pub type MasterSeed = [u8; MASTER_SEED_SIZE];

/// Generate a fresh 12-word recovery phrase from OS entropy.
pub fn generate_recovery_phrase() -> String {
    let mut entropy = [0u8; PHRASE_ENTROPY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    // 16 bytes is always a valid BIP-39 entropy length
    match Mnemonic::from_entropy_in(Language::English, &entropy) {
        Ok(mnemonic) => mnemonic.to_string(),
        Err(_) => unreachable!("16-byte entropy is a valid mnemonic length"),
    }
}

/// Lower-case, trim and collapse whitespace so user-entered variants of the
/// same phrase converge to one seed.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse(phrase: &str) -> Result<Mnemonic, IdentityError> {
    let normalized = normalize_phrase(phrase);
    if normalized.split(' ').count() != PHRASE_WORD_COUNT {
        return Err(IdentityError::InvalidPhrase);
    }
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|_| IdentityError::InvalidPhrase)
}

/// Word-list membership and checksum check.
pub fn validate_recovery_phrase(phrase: &str) -> bool {
    parse(phrase).is_ok()
}

pub fn derive_master_seed(phrase: &str) -> Result<MasterSeed, IdentityError> {
    let mnemonic = parse(phrase)?;
    Ok(mnemonic.to_seed_normalized(""))
}
