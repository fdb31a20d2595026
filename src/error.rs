//! pixvault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ═══════════════════════════════════════════════════════════════
    // VAULT / SESSION ERRORS
    // ═══════════════════════════════════════════════════════════════

    /// Encrypted records exist but no key is active in the session
    #[error("Vault is locked")]
    VaultLocked,

    /// Wrong password or unusable crypto config; the two are not told apart
    #[error("Invalid password")]
    InvalidPassword,

    #[error("Encryption is not enabled for this vault")]
    EncryptionNotEnabled,

    #[error("Encryption is already enabled for this vault")]
    EncryptionAlreadyEnabled,

    #[error("{0} encrypted photos remain, refusing to drop the crypto config")]
    EncryptedRecordsRemain(usize),

    #[error("Vault already exists at: {0}")]
    VaultAlreadyExists(String),

    #[error("Vault not found at: {0}")]
    VaultNotFound(String),

    #[error("Vault corrupted: {0}")]
    VaultCorrupted(String),

    // ═══════════════════════════════════════════════════════════════
    // STORE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Photo not found: {0}")]
    PhotoNotFound(String),

    #[error("Album not found: {0}")]
    AlbumNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // BACKUP ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Backup location not configured")]
    BackupNotConfigured,

    #[error("Permission denied for backup location: {0}")]
    PermissionDenied(String),

    #[error("A backup is already running")]
    BackupInProgress,

    // ═══════════════════════════════════════════════════════════════
    // INGEST ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Image processing error: {0}")]
    ImageError(String),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl VaultError {
    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::DecryptionFailed(_)
                | VaultError::VaultCorrupted(_)
                | VaultError::EncryptedRecordsRemain(_)
        )
    }

    /// Errors the user can fix by trying again (re-prompt for a password)
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::InvalidPassword)
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<zip::result::ZipError> for VaultError {
    fn from(e: zip::result::ZipError) -> Self {
        VaultError::ArchiveError(e.to_string())
    }
}

impl From<image::ImageError> for VaultError {
    fn from(e: image::ImageError) -> Self {
        VaultError::ImageError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_password_errors_are_retryable() {
        assert!(VaultError::InvalidPassword.is_retryable());
        assert!(!VaultError::VaultLocked.is_retryable());
        assert!(!VaultError::DecryptionFailed("tag".into()).is_retryable());
    }

    #[test]
    fn test_security_critical() {
        assert!(VaultError::DecryptionFailed("x".into()).is_security_critical());
        assert!(!VaultError::InvalidBackup("x".into()).is_security_critical());
    }
}
