//! # tally-client
//!
//! Device side of Tally vault sync.
//!
//! - **Document**: the vault as a yrs CRDT with a record API on top
//! - **Codec**: self-describing payloads sealed under the vault key
//! - **Relay client**: signed, typed calls over a pluggable transport
//! - **Sync**: push/pull/compact with snapshot version tracking, plus key
//!   distribution (create, invite, join)
//! - **Session** and **presence throttling**
//!
//! Nothing here installs a tracing subscriber; that is the embedding app's
//! call.

pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod keys;
pub mod presence;
pub mod relay_client;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::ClientConfig;
pub use document::{ExportKind, ExportedState, Record, VaultDocument, VersionVector};
pub use error::{CodecError, Result, SyncError};
pub use presence::PresenceThrottle;
pub use relay_client::RelayClient;
pub use session::Session;
pub use sync::{PullReport, SyncReport, SyncState, VaultSync};
pub use transport::{HttpTransport, RelayRequest, RelayResponse, RelayTransport};
