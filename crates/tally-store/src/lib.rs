//! # tally-store
//!
//! Relay-side persistence for Tally, backed by SQLite.
//!
//! The relay never sees plaintext: every payload stored here is an opaque
//! base64 ciphertext produced on a device. This crate only tracks the envelope
//! metadata needed to serve sync (vault ownership, snapshot versions, update
//! arrival order, wrapped keys) and enforces the version rules that keep
//! replicas from pushing onto a stale base.
//!
//! The `Database` handle is synchronous; the relay serializes access to it.

pub mod database;
pub mod keys;
pub mod migrations;
pub mod models;
pub mod snapshots;
pub mod updates;
pub mod vaults;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
