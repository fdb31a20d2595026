//! pixvault - Vault Configuration
//!
//! `config.json` in the vault root. Missing fields fall back to defaults so
//! older files keep loading.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

pub const CONFIG_FILE: &str = "config.json";

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault name
    pub name: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Crate version that wrote the file
    pub version: String,
    /// Thumbnail edge in pixels
    pub thumb_size: u32,
    /// Days without a backup before the reminder is due
    pub reminder_days: u32,
    pub backup: BackupSettings,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "pixvault".into(),
            created_at: Utc::now(),
            version: crate::VERSION.into(),
            thumb_size: 256,
            reminder_days: 7,
            backup: BackupSettings::default(),
        }
    }
}

/// Automatic backup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub debounce_secs: u64,
    pub min_interval_secs: u64,
    pub file_prefix: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            debounce_secs: 30,
            min_interval_secs: 600,
            file_prefix: "pixvault-backup".into(),
        }
    }
}

impl VaultConfig {
    /// Load `config.json` from `vault_root`
    pub fn load(vault_root: &Path) -> VaultResult<Self> {
        let data = std::fs::read(vault_root.join(CONFIG_FILE))?;
        serde_json::from_slice(&data)
            .map_err(|e| VaultError::DeserializationError(format!("{}: {}", CONFIG_FILE, e)))
    }

    /// Load, or write defaults if the file does not exist yet
    pub fn load_or_create(vault_root: &Path) -> VaultResult<Self> {
        if vault_root.join(CONFIG_FILE).exists() {
            return Self::load(vault_root);
        }

        let config = Self::default();
        config.save(vault_root)?;
        Ok(config)
    }

    pub fn save(&self, vault_root: &Path) -> VaultResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let path = vault_root.join(CONFIG_FILE);
        let temp_path = path.with_extension("json.tmp");

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_written_on_first_load() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(config.thumb_size, 256);
        assert_eq!(config.reminder_days, 7);
        assert_eq!(config.backup.debounce_secs, 30);
        assert_eq!(config.backup.min_interval_secs, 600);
        assert!(dir.path().join(CONFIG_FILE).exists());

        let again = VaultConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            br#"{"name": "Family", "backup": {"debounce_secs": 5}}"#,
        )
        .unwrap();

        let config = VaultConfig::load(dir.path()).unwrap();
        assert_eq!(config.name, "Family");
        assert_eq!(config.backup.debounce_secs, 5);
        assert_eq!(config.backup.file_prefix, "pixvault-backup");
        assert_eq!(config.reminder_days, 7);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"[]").unwrap();
        assert!(matches!(
            VaultConfig::load(dir.path()),
            Err(VaultError::DeserializationError(_))
        ));
    }
}
