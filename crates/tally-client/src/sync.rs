//! Encrypted sync of one vault document against the relay.
//!
//! Local edits go up as encrypted deltas, remote ones come down in arrival
//! order and merge into the shared [`VaultDocument`]. The relay never sees
//! plaintext and never has to understand the CRDT.

use std::sync::{Arc, Mutex, PoisonError};

use tally_shared::auth::now_ms;
use tally_shared::hlc::{Hlc, HybridClock};
use tally_shared::protocol::{
    PushUpdateRequest, PushUpdateResponse, SaveSnapshotRequest, SaveSnapshotResponse,
    SyncStatus, UpdatesQuery, WrappedVaultKey,
};
use tally_shared::{PubkeyHash, VaultId, VaultKey};
use tracing::{debug, info, warn};
use x25519_dalek::PublicKey;

use crate::codec::{open_payload, seal_payload};
use crate::config::ClientConfig;
use crate::document::{ExportKind, ExportedState, VaultDocument};
use crate::error::{Result, SyncError};
use crate::keys;
use crate::relay_client::RelayClient;

/// Where this device stands relative to the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Latest snapshot version seen. 0 before the first snapshot.
    pub known_snapshot_version: u64,
    /// Highest update sequence imported.
    pub cursor: u64,
    /// Local clock already on the relay, as an update or inside a snapshot.
    pub pushed_clock: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Version of the snapshot imported during this pull, if any.
    pub snapshot_version: Option<u64>,
    pub updates_applied: usize,
    /// The relay had pruned past our cursor and we re-pulled from its
    /// latest snapshot.
    pub reset: bool,
}

impl PullReport {
    fn absorb(&mut self, other: PullReport) {
        self.snapshot_version = other.snapshot_version.or(self.snapshot_version);
        self.updates_applied += other.updates_applied;
        self.reset |= other.reset;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: PullReport,
    pub pushed: Option<PushUpdateResponse>,
}

pub struct VaultSync {
    vault_id: VaultId,
    vault_key: VaultKey,
    document: Arc<VaultDocument>,
    relay: RelayClient,
    clock: Mutex<HybridClock>,
    // Held across relay calls: one push/pull/compact at a time.
    state: tokio::sync::Mutex<SyncState>,
    page_size: u32,
}

impl VaultSync {
    pub fn new(
        vault_id: VaultId,
        vault_key: VaultKey,
        document: Arc<VaultDocument>,
        relay: RelayClient,
        config: &ClientConfig,
    ) -> Self {
        Self {
            vault_id,
            vault_key,
            document,
            relay,
            clock: Mutex::new(HybridClock::new(config.replica_id.clone())),
            state: tokio::sync::Mutex::new(SyncState::default()),
            page_size: config.pull_page_size.max(1),
        }
    }

    /// Register a new vault on the relay and return a syncer for it.
    pub async fn create(
        vault_id: VaultId,
        document: Arc<VaultDocument>,
        relay: RelayClient,
        config: &ClientConfig,
    ) -> Result<Self> {
        let key = keys::create_vault(&relay, &vault_id).await?;
        Ok(Self::new(vault_id, key, document, relay, config))
    }

    /// Open the caller's key for an existing vault and return a syncer.
    pub async fn join(
        vault_id: VaultId,
        document: Arc<VaultDocument>,
        relay: RelayClient,
        config: &ClientConfig,
    ) -> Result<Self> {
        let key = keys::join_vault(&relay, &vault_id).await?;
        Ok(Self::new(vault_id, key, document, relay, config))
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn document(&self) -> &Arc<VaultDocument> {
        &self.document
    }

    pub async fn state(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    pub async fn invite(
        &self,
        recipient: PubkeyHash,
        recipient_public: &PublicKey,
    ) -> Result<WrappedVaultKey> {
        keys::invite(
            &self.relay,
            &self.vault_id,
            &self.vault_key,
            recipient,
            recipient_public,
        )
        .await
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        self.relay.status(&self.vault_id).await
    }

    /// Send local changes made since the last push. `Ok(None)` when there
    /// was nothing to send.
    pub async fn push(&self) -> Result<Option<PushUpdateResponse>> {
        let mut state = self.state.lock().await;
        self.push_locked(&mut state).await
    }

    /// Bring the document up to date with the relay.
    pub async fn pull(&self) -> Result<PullReport> {
        let mut state = self.state.lock().await;
        match self.pull_locked(&mut state).await {
            Err(SyncError::VersionTooOld) => {
                warn!(
                    vault = %self.vault_id,
                    cursor = state.cursor,
                    "relay pruned past local cursor, re-pulling from latest snapshot"
                );
                state.known_snapshot_version = 0;
                state.cursor = 0;
                let mut report = self.pull_locked(&mut state).await?;
                report.reset = true;
                Ok(report)
            }
            other => other,
        }
    }

    /// Pull then push. If someone compacted in between, pull once more and
    /// retry the push once.
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut pulled = self.pull().await?;
        let pushed = match self.push().await {
            Err(SyncError::VersionConflict) => {
                debug!(vault = %self.vault_id, "snapshot moved during sync, retrying");
                pulled.absorb(self.pull().await?);
                self.push().await?
            }
            other => other?,
        };
        Ok(SyncReport { pulled, pushed })
    }

    /// Fold everything into a new snapshot at `latest + 1`.
    pub async fn compact(&self) -> Result<SaveSnapshotResponse> {
        self.pull().await?;

        let mut state = self.state.lock().await;
        let local_clock = self.document.local_clock();
        let snapshot = ExportedState {
            kind: ExportKind::Snapshot,
            data: self.document.export_snapshot(),
        };
        let version = state.known_snapshot_version + 1;
        let request = SaveSnapshotRequest {
            encrypted_data: seal_payload(snapshot, &self.vault_key, &self.vault_id)?,
            version,
            hlc_timestamp: self.tick(),
            through_seq: state.cursor,
        };
        let response = self.relay.save_snapshot(&self.vault_id, &request).await?;

        state.known_snapshot_version = version;
        state.pushed_clock = state.pushed_clock.max(local_clock);
        info!(
            vault = %self.vault_id,
            version,
            through_seq = request.through_seq,
            "snapshot saved"
        );
        Ok(response)
    }

    async fn push_locked(&self, state: &mut SyncState) -> Result<Option<PushUpdateResponse>> {
        // Read the clock before exporting so an edit racing the export is
        // sent again next time rather than skipped.
        let local_clock = self.document.local_clock();
        if local_clock <= state.pushed_clock {
            debug!(vault = %self.vault_id, "nothing to push");
            return Ok(None);
        }

        let base = self.document.local_base(state.pushed_clock);
        let exported = self.document.export_updates_safe(Some(&base));
        let request = PushUpdateRequest {
            encrypted_data: seal_payload(exported, &self.vault_key, &self.vault_id)?,
            base_snapshot_version: state.known_snapshot_version,
            hlc_timestamp: self.tick(),
        };
        let response = self.relay.push_update(&self.vault_id, &request).await?;

        state.pushed_clock = local_clock;
        debug!(vault = %self.vault_id, seq = response.seq, "update pushed");
        Ok(Some(response))
    }

    async fn pull_locked(&self, state: &mut SyncState) -> Result<PullReport> {
        let mut report = PullReport::default();

        let status = self.relay.status(&self.vault_id).await?;
        if status.has_snapshot && status.latest_snapshot_version > state.known_snapshot_version {
            if let Some(snapshot) = self.relay.get_snapshot(&self.vault_id).await? {
                let payload = open_payload(&snapshot.encrypted_data, &self.vault_key, &self.vault_id)?;
                self.document.import_data(&payload.data)?;
                self.observe(&snapshot.hlc_timestamp);

                state.known_snapshot_version = snapshot.version;
                state.cursor = state.cursor.max(snapshot.through_seq);
                report.snapshot_version = Some(snapshot.version);
                debug!(
                    vault = %self.vault_id,
                    version = snapshot.version,
                    through_seq = snapshot.through_seq,
                    "snapshot imported"
                );
            }
        }

        loop {
            let query = UpdatesQuery {
                since: None,
                after: Some(state.cursor),
                limit: Some(self.page_size),
            };
            let page = self.relay.get_updates(&self.vault_id, &query).await?;
            let Some(last) = page.last() else {
                break;
            };

            let mut blobs = Vec::with_capacity(page.len());
            for update in &page {
                let payload = open_payload(&update.encrypted_data, &self.vault_key, &self.vault_id)
                    .map_err(|e| {
                        warn!(vault = %self.vault_id, seq = update.seq, error = %e, "undecryptable update");
                        e
                    })?;
                blobs.push(payload.data);
            }
            self.document.import_updates(&blobs)?;
            for update in &page {
                self.observe(&update.hlc_timestamp);
            }

            state.cursor = last.seq;
            report.updates_applied += page.len();
            if page.len() < self.page_size as usize {
                break;
            }
        }

        if report.updates_applied > 0 || report.snapshot_version.is_some() {
            info!(
                vault = %self.vault_id,
                updates = report.updates_applied,
                cursor = state.cursor,
                "pulled"
            );
        }
        Ok(report)
    }

    fn tick(&self) -> Hlc {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.tick(wall_ms())
    }

    fn observe(&self, remote: &Hlc) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.receive(remote, wall_ms());
    }
}

fn wall_ms() -> u64 {
    now_ms().max(0) as u64
}
