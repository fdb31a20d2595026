//! pixvault - Record Store
//!
//! `Store` is plain persistence of photo and album records. Encryption is
//! layered on top by [`EncryptedStore`], which decorates any `Store`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoConfig;
use crate::error::VaultResult;

pub mod encrypted;
pub mod sqlite;

pub use encrypted::{EncryptedStore, UsageEstimate};
pub use sqlite::SqliteStore;

/// A photo as the rest of the application sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    /// Unique ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Albums this photo belongs to
    pub album_ids: BTreeSet<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Full-size image bytes
    pub primary_payload: Vec<u8>,
    /// Thumbnail image bytes
    pub thumbnail_payload: Vec<u8>,
}

impl Photo {
    /// New photo with a fresh id, timestamped now
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        primary_payload: Vec<u8>,
        thumbnail_payload: Vec<u8>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            album_ids: BTreeSet::new(),
            created_at: Utc::now(),
            width,
            height,
            primary_payload,
            thumbnail_payload,
        }
    }

    /// Combined size of both payloads
    pub fn payload_len(&self) -> u64 {
        (self.primary_payload.len() + self.thumbnail_payload.len()) as u64
    }
}

/// Photo record as persisted: payloads are ciphertext when `encrypted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPhoto {
    pub photo: Photo,
    pub encrypted: bool,
}

impl StoredPhoto {
    pub fn id(&self) -> &str {
        &self.photo.id
    }
}

/// Album (never encrypted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

impl Album {
    pub fn new(name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            icon: icon.into(),
            created_at: Utc::now(),
        }
    }
}

/// Raw payload byte totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadTotals {
    pub photos: usize,
    pub encrypted_photos: usize,
    pub primary_bytes: u64,
    pub thumbnail_bytes: u64,
}

/// Plain keyed persistence for photos, albums and vault settings.
///
/// Implementations do no cryptography: payload bytes are written and read
/// back exactly as given, with the `encrypted` tag alongside.
pub trait Store: Send + Sync {
    // Photos
    fn put_photo(&self, record: &StoredPhoto) -> VaultResult<()>;
    fn get_photo(&self, id: &str) -> VaultResult<Option<StoredPhoto>>;
    /// All photos, newest first
    fn all_photos(&self) -> VaultResult<Vec<StoredPhoto>>;
    /// Photos that are members of `album_id`, newest first
    fn photos_in_album(&self, album_id: &str) -> VaultResult<Vec<StoredPhoto>>;
    /// Ids of photos whose `encrypted` tag equals `encrypted`
    fn photo_ids_by_state(&self, encrypted: bool) -> VaultResult<Vec<String>>;
    fn delete_photo(&self, id: &str) -> VaultResult<bool>;
    fn payload_totals(&self) -> VaultResult<PayloadTotals>;

    // Albums
    fn put_album(&self, album: &Album) -> VaultResult<()>;
    fn get_album(&self, id: &str) -> VaultResult<Option<Album>>;
    fn all_albums(&self) -> VaultResult<Vec<Album>>;
    /// Remove `album_id` and write `rewritten` photos in one transaction
    fn remove_album(&self, album_id: &str, rewritten: &[StoredPhoto]) -> VaultResult<bool>;

    // Vault settings
    fn crypto_config(&self) -> VaultResult<Option<CryptoConfig>>;
    fn save_crypto_config(&self, config: &CryptoConfig) -> VaultResult<()>;
    fn clear_crypto_config(&self) -> VaultResult<()>;
    fn setting(&self, key: &str) -> VaultResult<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> VaultResult<()>;
}
