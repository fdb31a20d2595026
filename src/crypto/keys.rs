//! pixvault - Key Management
//!
//! Derives the session key from a password and guards unlock attempts with a
//! stored verification token.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::aead::{decrypt_aes_gcm, encrypt_aes_gcm, EncryptedData};
use crate::error::{VaultError, VaultResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Salt length for PBKDF2
pub const SALT_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 rounds
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Known plaintext encrypted into the verification token
const VERIFY_MARKER: &[u8] = b"PIXVAULT:VERIFY:v1";

/// Secure key wrapper, zeroized on drop
pub struct VaultKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Derive the vault key from a password and salt (PBKDF2-HMAC-SHA256)
pub fn derive_key(password: &str, salt: &[u8]) -> VaultResult<VaultKey> {
    if salt.len() != SALT_LEN {
        return Err(VaultError::KeyDerivationFailed(format!(
            "salt must be {} bytes, got {}",
            SALT_LEN,
            salt.len()
        )));
    }

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut *okm);

    Ok(VaultKey::new(*okm))
}

/// Generate a random salt for key derivation
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt the verification marker under `key`, returning `(iv, ciphertext)`
pub fn create_verification(key: &VaultKey) -> VaultResult<([u8; NONCE_LEN], Vec<u8>)> {
    let sealed = encrypt_aes_gcm(key, VERIFY_MARKER)?;
    let iv: [u8; NONCE_LEN] = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::EncryptionFailed("Invalid nonce length".into()))?;
    Ok((iv, sealed.ciphertext))
}

/// Check a candidate key against the stored verification token.
///
/// Any failure (bad tag, truncated token, wrong marker) is `false`.
pub fn verify_password(key: &VaultKey, iv: &[u8], ciphertext: &[u8]) -> bool {
    let sealed = EncryptedData {
        nonce: iv.to_vec(),
        ciphertext: ciphertext.to_vec(),
    };

    match decrypt_aes_gcm(key, &sealed) {
        Ok(plaintext) => plaintext.as_slice() == VERIFY_MARKER,
        Err(_) => false,
    }
}

/// Persisted, non-secret encryption settings.
///
/// Its presence in the store is what marks encryption as enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub salt: [u8; SALT_LEN],
    pub verify_iv: [u8; NONCE_LEN],
    pub verify_ciphertext: Vec<u8>,
}

impl CryptoConfig {
    /// Fresh salt, derived key and verification token for `password`
    pub fn create(password: &str) -> VaultResult<(Self, VaultKey)> {
        let salt = generate_salt();
        let key = derive_key(password, &salt)?;
        let (verify_iv, verify_ciphertext) = create_verification(&key)?;

        Ok((
            Self {
                salt,
                verify_iv,
                verify_ciphertext,
            },
            key,
        ))
    }

    /// Derive the key for `password` and return it only if it verifies
    pub fn unlock(&self, password: &str) -> VaultResult<VaultKey> {
        let key = derive_key(password, &self.salt).map_err(|_| VaultError::InvalidPassword)?;

        if verify_password(&key, &self.verify_iv, &self.verify_ciphertext) {
            Ok(key)
        } else {
            Err(VaultError::InvalidPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [7u8; SALT_LEN];
        let k1 = derive_key("correct-horse", &salt).unwrap();
        let k2 = derive_key("correct-horse", &salt).unwrap();
        assert_eq!(k1.expose(), k2.expose());

        // Same password, different salt
        let k3 = derive_key("correct-horse", &[8u8; SALT_LEN]).unwrap();
        assert_ne!(k1.expose(), k3.expose());
    }

    #[test]
    fn test_derive_key_rejects_short_salt() {
        assert!(matches!(
            derive_key("pw", &[0u8; 4]),
            Err(VaultError::KeyDerivationFailed(_))
        ));
    }

    #[test]
    fn test_correct_horse_scenario() {
        let salt = generate_salt();
        let key = derive_key("correct-horse", &salt).unwrap();
        let (iv, ct) = create_verification(&key).unwrap();

        for _ in 0..2 {
            let good = derive_key("correct-horse", &salt).unwrap();
            assert!(verify_password(&good, &iv, &ct));

            let bad = derive_key("wrong", &salt).unwrap();
            assert!(!verify_password(&bad, &iv, &ct));
        }
    }

    #[test]
    fn test_verify_password_garbage_is_false() {
        let key = VaultKey::generate();
        assert!(!verify_password(&key, &[0u8; 3], b"short"));
        assert!(!verify_password(&key, &[0u8; NONCE_LEN], &[0u8; 40]));
    }

    #[test]
    fn test_crypto_config_unlock() {
        let (config, key) = CryptoConfig::create("hunter2").unwrap();

        let unlocked = config.unlock("hunter2").unwrap();
        assert_eq!(unlocked.expose(), key.expose());

        let err = config.unlock("hunter3").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = VaultKey::new([0x42; KEY_LEN]);
        assert_eq!(format!("{:?}", key), "VaultKey([REDACTED])");
    }
}
