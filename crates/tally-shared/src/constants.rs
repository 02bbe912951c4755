/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Ed25519 / X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Vault key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of the BIP-39 master seed in bytes
pub const MASTER_SEED_SIZE: usize = 64;

/// Entropy behind a recovery phrase (128 bits -> 12 words)
pub const PHRASE_ENTROPY_SIZE: usize = 16;

/// Number of words in a recovery phrase
pub const PHRASE_WORD_COUNT: usize = 12;

/// Default replay window for signed requests (5 minutes)
pub const DEFAULT_MAX_REQUEST_AGE_MS: i64 = 300_000;

/// Signed-request header names
pub const HEADER_PUBKEY: &str = "x-pubkey";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_SIGNATURE: &str = "x-signature";

/// Update listing bounds
pub const DEFAULT_UPDATE_LIMIT: u32 = 100;
pub const MAX_UPDATE_LIMIT: u32 = 1000;

/// Default HTTP API port (relay)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SIGNING_KEY: &str = "tally-signing-key-v1";
pub const KDF_CONTEXT_ENCRYPTION_KEY: &str = "tally-encryption-key-v1";
pub const KDF_CONTEXT_KEY_WRAP: &str = "tally-key-wrap-v1";
pub const KDF_CONTEXT_KEY_SEAL: &str = "tally-key-seal-v1";
