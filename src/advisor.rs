//! pixvault - Storage Advisor
//!
//! Usage estimates, durable storage requests and the backup reminder.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::error::VaultResult;
use crate::store::{EncryptedStore, Store, UsageEstimate};

/// Host environment that may evict vault storage under pressure
pub trait StorageHost {
    /// Ask for the vault's storage to be exempt from eviction
    fn persist(&self) -> VaultResult<bool>;
}

/// Host for vaults on a local filesystem.
///
/// Storage counts as durable unless it lives in a temp or cache directory,
/// which the OS or cleanup tools may wipe.
#[derive(Debug, Clone)]
pub struct FilesystemHost {
    root: PathBuf,
}

impl FilesystemHost {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl StorageHost for FilesystemHost {
    fn persist(&self) -> VaultResult<bool> {
        let root = canonical(&self.root);

        let volatile = [Some(std::env::temp_dir()), dirs::cache_dir()];
        for dir in volatile.iter().flatten() {
            if root.starts_with(canonical(dir)) {
                log::debug!("{} is under volatile {}", root.display(), dir.display());
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Best-effort durable storage request; failures count as not granted
pub fn request_durable_storage(host: &dyn StorageHost) -> bool {
    match host.persist() {
        Ok(granted) => {
            log::info!("Durable storage {}", if granted { "granted" } else { "not granted" });
            granted
        }
        Err(e) => {
            log::warn!("Durable storage request failed: {}", e);
            false
        }
    }
}

/// Backup reminder and usage reporting
#[derive(Debug, Clone, Copy)]
pub struct StorageAdvisor {
    reminder_days: u32,
}

impl Default for StorageAdvisor {
    fn default() -> Self {
        Self::new(7)
    }
}

impl StorageAdvisor {
    pub fn new(reminder_days: u32) -> Self {
        Self { reminder_days }
    }

    /// True when there is something to lose and no recent backup
    pub fn is_due(
        &self,
        photo_count: usize,
        last_backup: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if photo_count == 0 {
            return false;
        }

        match last_backup {
            Some(at) => now - at > Duration::days(i64::from(self.reminder_days)),
            None => true,
        }
    }

    pub fn estimate<S: Store>(&self, store: &EncryptedStore<S>) -> VaultResult<UsageEstimate> {
        store.estimate_usage()
    }
}
