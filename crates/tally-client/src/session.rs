//! The unlocked identity for one user, held only as long as they're
//! logged in.

use std::sync::RwLock;

use serde_json::Value;
use tally_shared::auth::{sign_request, SignatureHeaders};
use tally_shared::{Identity, PubkeyHash};

use crate::error::{Result, SyncError};

/// Owns the user's [`Identity`] between unlock and logout. Everything that
/// needs key material asks the session for it; nothing caches it.
#[derive(Debug, Default)]
pub struct Session {
    identity: RwLock<Option<Identity>>,
}

impl Session {
    /// Unlock from a recovery phrase.
    pub fn unlock(phrase: &str) -> Result<Self> {
        Ok(Self::from_identity(Identity::from_phrase(phrase)?))
    }

    pub fn from_identity(identity: Identity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.identity.read().map(|id| id.is_some()).unwrap_or(false)
    }

    /// Drop the identity. Key material zeroizes on drop; later calls fail
    /// with `NoSession`.
    pub fn logout(&self) {
        match self.identity.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        tracing::info!("Session closed");
    }

    /// Run `f` with the identity, if still logged in.
    pub fn with_identity<T>(&self, f: impl FnOnce(&Identity) -> Result<T>) -> Result<T> {
        let guard = self.identity.read().map_err(|_| SyncError::NoSession)?;
        let identity = guard.as_ref().ok_or(SyncError::NoSession)?;
        f(identity)
    }

    pub fn pubkey_hash(&self) -> Result<PubkeyHash> {
        self.with_identity(|id| Ok(id.pubkey_hash()))
    }

    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<SignatureHeaders> {
        self.with_identity(|id| Ok(sign_request(id, method, path, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_shared::auth::verify_request;
    use tally_shared::mnemonic::generate_recovery_phrase;

    #[test]
    fn test_unlock_sign_logout() {
        let session = Session::unlock(&generate_recovery_phrase()).unwrap();
        assert!(session.is_active());
        let hash = session.pubkey_hash().unwrap();

        let headers = session.sign_request("GET", "/vaults/x/status", None).unwrap();
        let verified = verify_request("GET", "/vaults/x/status", None, &headers, 60_000).unwrap();
        assert_eq!(verified, hash);

        session.logout();
        assert!(!session.is_active());
        assert!(matches!(session.pubkey_hash(), Err(SyncError::NoSession)));
        assert!(matches!(
            session.sign_request("GET", "/health", None),
            Err(SyncError::NoSession)
        ));
    }

    #[test]
    fn test_bad_phrase() {
        assert!(matches!(
            Session::unlock("not a phrase"),
            Err(SyncError::Identity(_))
        ));
    }
}
