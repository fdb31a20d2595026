//! pixvault - Key Session
//!
//! Holds the active key for the lifetime of the process only.

use std::sync::Arc;

use parking_lot::RwLock;

use super::keys::VaultKey;

/// In-memory holder of the active vault key.
///
/// Shared by `Arc` between the vault facade and the encrypted store. Nothing
/// here is ever written to disk; dropping the process locks the vault.
#[derive(Default)]
pub struct KeySession {
    key: RwLock<Option<Arc<VaultKey>>>,
}

impl KeySession {
    /// New, locked session
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active key; `None` locks the session
    pub fn set_key(&self, key: Option<VaultKey>) {
        *self.key.write() = key.map(Arc::new);
    }

    /// Active key, if unlocked
    pub fn key(&self) -> Option<Arc<VaultKey>> {
        self.key.read().clone()
    }

    /// Drop the key (explicit lock or encryption removal)
    pub fn clear(&self) {
        self.set_key(None);
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().is_some()
    }
}

impl std::fmt::Debug for KeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySession")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
