//! pixvault - AEAD Encryption
//!
//! AES-256-GCM for photo and thumbnail payloads.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use super::keys::{generate_nonce, VaultKey, NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// GCM authentication tag size
pub const TAG_LEN: usize = 16;

/// Bytes a sealed payload carries on top of its plaintext
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Encrypted data with nonce prepended
pub struct EncryptedData {
    /// Nonce (12 bytes)
    pub nonce: Vec<u8>,
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Serialize to bytes (nonce || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.nonce.len() + self.ciphertext.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Deserialize from bytes (nonce || ciphertext)
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.len() < SEAL_OVERHEAD {
            return Err(VaultError::DecryptionFailed("Data too short".into()));
        }

        Ok(Self {
            nonce: data[..NONCE_LEN].to_vec(),
            ciphertext: data[NONCE_LEN..].to_vec(),
        })
    }
}

/// Encrypt data with AES-256-GCM under a fresh random nonce
pub fn encrypt_aes_gcm(key: &VaultKey, plaintext: &[u8]) -> VaultResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt data with AES-256-GCM
pub fn decrypt_aes_gcm(key: &VaultKey, encrypted: &EncryptedData) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    if encrypted.nonce.len() != NONCE_LEN {
        return Err(VaultError::DecryptionFailed("Invalid nonce length".into()));
    }

    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, encrypted.ciphertext.as_slice())
        .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
}

/// Seal a payload into a self-contained `nonce || ciphertext || tag` blob
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    Ok(encrypt_aes_gcm(key, plaintext)?.to_bytes())
}

/// Open a blob produced by [`seal`]
pub fn open(key: &VaultKey, sealed: &[u8]) -> VaultResult<Vec<u8>> {
    let encrypted = EncryptedData::from_bytes(sealed)?;
    decrypt_aes_gcm(key, &encrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let key = VaultKey::generate();
        let plaintext = b"\xFF\xD8\xFF\xE0 jpeg bytes of a cat";

        let encrypted = encrypt_aes_gcm(&key, plaintext).unwrap();
        let decrypted = decrypt_aes_gcm(&key, &encrypted).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = VaultKey::generate();
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let sealed = seal(&key, &payload).unwrap();
        assert_eq!(sealed.len(), payload.len() + SEAL_OVERHEAD);
        assert_eq!(open(&key, &sealed).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let key = VaultKey::generate();
        let sealed = seal(&key, b"").unwrap();
        assert!(open(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = VaultKey::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = VaultKey::generate();
        let key2 = VaultKey::generate();

        let sealed = seal(&key1, b"Secret data").unwrap();
        let result = open(&key2, &sealed);

        assert!(matches!(result, Err(VaultError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_fails() {
        let key = VaultKey::generate();
        let mut sealed = seal(&key, b"photo").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_truncated_fails() {
        let key = VaultKey::generate();
        assert!(open(&key, &[0u8; SEAL_OVERHEAD - 1]).is_err());
    }
}
