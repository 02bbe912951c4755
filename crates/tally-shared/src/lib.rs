//! # tally-shared
//!
//! Cryptographic core and wire types shared by the Tally client and relay.
//!
//! Nothing in this crate performs I/O. Every function is a pure transform over
//! byte buffers and key material, so the same code runs on devices and on the
//! relay.

pub mod auth;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod hlc;
pub mod identity;
pub mod keywrap;
pub mod mnemonic;
pub mod protocol;
pub mod types;

pub use identity::Identity;
pub use types::{PubkeyHash, VaultId, VaultKey};
