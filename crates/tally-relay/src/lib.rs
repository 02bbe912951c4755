//! # tally-relay
//!
//! Encrypted blob relay for Tally vault sync.
//!
//! The relay stores and forwards ciphertext. It authenticates every vault call
//! by signature (no sessions, no passwords), enforces vault membership and the
//! snapshot version rules, and never holds a key that could decrypt what it
//! stores.
//!
//! - **REST API** (axum) for snapshots, updates, sync status and wrapped keys
//! - **Signed-request middleware** verifying `X-Pubkey` / `X-Timestamp` /
//!   `X-Signature`
//! - **Per-IP rate limiting**

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod vaults;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
