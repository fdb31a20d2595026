//! pixvault - Backup Handle Slot
//!
//! The granted auto-backup location lives in its own file beside the
//! database, so clearing it never touches photo or album data.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// File name of the slot inside the vault root
pub const HANDLE_FILE: &str = "backup_handle.json";

/// Capability to write backups to an external location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandleRecord {
    /// Directory backups are written into
    pub location: PathBuf,
    /// When the user granted it
    pub granted_at: DateTime<Utc>,
}

impl BackupHandleRecord {
    pub fn new(location: &Path) -> Self {
        Self {
            location: location.to_path_buf(),
            granted_at: Utc::now(),
        }
    }
}

/// Single-slot persistence for the backup handle
pub struct HandleStore {
    path: PathBuf,
    cached: RwLock<Option<BackupHandleRecord>>,
}

impl HandleStore {
    /// Load the slot under `vault_root`, empty if no handle was saved
    pub fn load(vault_root: &Path) -> VaultResult<Self> {
        let path = vault_root.join(HANDLE_FILE);

        let cached = if path.exists() {
            let data = std::fs::read(&path)?;
            let record = serde_json::from_slice(&data)
                .map_err(|e| VaultError::VaultCorrupted(format!("Backup handle: {}", e)))?;
            Some(record)
        } else {
            None
        };

        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }

    /// Current handle, if any
    pub fn get(&self) -> Option<BackupHandleRecord> {
        self.cached.read().clone()
    }

    /// Replace the handle
    pub fn save(&self, record: BackupHandleRecord) -> VaultResult<()> {
        let data = serde_json::to_vec_pretty(&record)?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &self.path)?;

        log::info!("Backup location set to {}", record.location.display());
        *self.cached.write() = Some(record);
        Ok(())
    }

    /// Drop the handle; a no-op if none is stored
    pub fn clear(&self) -> VaultResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }

        if self.cached.write().take().is_some() {
            log::info!("Backup location cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_slot_lifecycle() {
        let dir = tempdir().unwrap();
        let slot = HandleStore::load(dir.path()).unwrap();
        assert!(slot.get().is_none());

        let record = BackupHandleRecord::new(&dir.path().join("external"));
        slot.save(record.clone()).unwrap();
        assert_eq!(slot.get(), Some(record.clone()));

        // Survives reload
        let reloaded = HandleStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.get(), Some(record));

        reloaded.clear().unwrap();
        assert!(reloaded.get().is_none());
        assert!(!dir.path().join(HANDLE_FILE).exists());
        assert!(HandleStore::load(dir.path()).unwrap().get().is_none());

        // Clearing twice is fine
        reloaded.clear().unwrap();
    }

    #[test]
    fn test_corrupt_slot_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(HANDLE_FILE), b"{not json").unwrap();

        assert!(matches!(
            HandleStore::load(dir.path()),
            Err(VaultError::VaultCorrupted(_))
        ));
    }
}
