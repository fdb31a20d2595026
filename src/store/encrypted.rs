//! pixvault - Encrypted Store
//!
//! Decorates a [`Store`] with transparent payload encryption driven by the
//! session key. Only the two payload fields are ever encrypted; names,
//! album membership and dimensions stay readable so scans work while locked.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Album, Photo, Store, StoredPhoto};
use crate::crypto::{open, seal, KeySession, VaultKey};
use crate::error::{VaultError, VaultResult};

/// Aggregate storage usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageEstimate {
    pub photos: usize,
    pub encrypted_photos: usize,
    /// Sum of both payload fields over all records, as stored
    pub payload_bytes: u64,
}

/// Store wrapper that seals payloads whenever the session holds a key
pub struct EncryptedStore<S: Store> {
    inner: S,
    session: Arc<KeySession>,
}

impl<S: Store> EncryptedStore<S> {
    pub fn new(inner: S, session: Arc<KeySession>) -> Self {
        Self { inner, session }
    }

    /// Underlying raw store (vault settings, crypto config)
    pub fn raw(&self) -> &S {
        &self.inner
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTOS
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a photo, sealing its payloads if a key is active
    pub fn put(&self, photo: &Photo) -> VaultResult<()> {
        let record = match self.session.key() {
            Some(key) => seal_photo(&key, photo)?,
            None => StoredPhoto {
                photo: photo.clone(),
                encrypted: false,
            },
        };

        self.inner.put_photo(&record)
    }

    /// Read a photo by id
    pub fn get(&self, id: &str) -> VaultResult<Option<Photo>> {
        self.inner
            .get_photo(id)?
            .map(|record| self.reveal(record))
            .transpose()
    }

    /// All photos, newest first
    pub fn get_all(&self) -> VaultResult<Vec<Photo>> {
        self.reveal_all(self.inner.all_photos()?)
    }

    /// Photos in an album, newest first
    pub fn get_by_album(&self, album_id: &str) -> VaultResult<Vec<Photo>> {
        self.reveal_all(self.inner.photos_in_album(album_id)?)
    }

    pub fn delete(&self, id: &str) -> VaultResult<bool> {
        self.inner.delete_photo(id)
    }

    /// Replace a photo's album set, keeping its payloads as stored
    pub fn set_photo_albums(&self, photo_id: &str, album_ids: BTreeSet<String>) -> VaultResult<()> {
        let mut record = self
            .inner
            .get_photo(photo_id)?
            .ok_or_else(|| VaultError::PhotoNotFound(photo_id.to_string()))?;

        record.photo.album_ids = album_ids;
        self.inner.put_photo(&record)
    }

    /// Rename a photo, keeping its payloads as stored
    pub fn rename_photo(&self, photo_id: &str, name: &str) -> VaultResult<()> {
        let mut record = self
            .inner
            .get_photo(photo_id)?
            .ok_or_else(|| VaultError::PhotoNotFound(photo_id.to_string()))?;

        record.photo.name = name.to_string();
        self.inner.put_photo(&record)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_album(&self, album: &Album) -> VaultResult<()> {
        self.inner.put_album(album)
    }

    pub fn get_album(&self, id: &str) -> VaultResult<Option<Album>> {
        self.inner.get_album(id)
    }

    pub fn get_albums(&self) -> VaultResult<Vec<Album>> {
        self.inner.all_albums()
    }

    /// Delete an album and drop it from every member photo, atomically.
    ///
    /// Payloads are carried over as stored, so encrypted members stay
    /// encrypted and no key is needed.
    pub fn delete_album(&self, album_id: &str) -> VaultResult<bool> {
        let rewritten: Vec<StoredPhoto> = self
            .inner
            .photos_in_album(album_id)?
            .into_iter()
            .map(|mut record| {
                record.photo.album_ids.remove(album_id);
                record
            })
            .collect();

        let removed = self.inner.remove_album(album_id, &rewritten)?;
        if removed {
            log::info!("Deleted album {} ({} photos updated)", album_id, rewritten.len());
        }
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MIGRATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Seal every plaintext record with the active key.
    ///
    /// Each record is persisted before the next is touched, so an interrupted
    /// run leaves a mix that the next call finishes.
    pub fn encrypt_all(&self, mut on_progress: impl FnMut(usize, usize)) -> VaultResult<usize> {
        let key = self.session.key().ok_or(VaultError::VaultLocked)?;
        let pending = self.inner.photo_ids_by_state(false)?;
        let total = pending.len();

        log::info!("Encrypting {} photos", total);

        for (done, id) in pending.iter().enumerate() {
            if let Some(record) = self.inner.get_photo(id)? {
                if !record.encrypted {
                    let sealed = seal_photo(&key, &record.photo)?;
                    self.inner.put_photo(&sealed)?;
                }
            }
            on_progress(done + 1, total);
        }

        Ok(total)
    }

    /// Open every sealed record back to plaintext (inverse of `encrypt_all`)
    pub fn decrypt_all(&self, mut on_progress: impl FnMut(usize, usize)) -> VaultResult<usize> {
        let pending = self.inner.photo_ids_by_state(true)?;
        let total = pending.len();
        if total == 0 {
            return Ok(0);
        }

        let key = self.session.key().ok_or(VaultError::VaultLocked)?;
        log::info!("Decrypting {} photos", total);

        for (done, id) in pending.iter().enumerate() {
            if let Some(record) = self.inner.get_photo(id)? {
                if record.encrypted {
                    let photo = open_photo(&key, record.photo)?;
                    self.inner.put_photo(&StoredPhoto {
                        photo,
                        encrypted: false,
                    })?;
                }
            }
            on_progress(done + 1, total);
        }

        Ok(total)
    }

    pub fn encrypted_count(&self) -> VaultResult<usize> {
        Ok(self.inner.photo_ids_by_state(true)?.len())
    }

    pub fn plaintext_count(&self) -> VaultResult<usize> {
        Ok(self.inner.photo_ids_by_state(false)?.len())
    }

    /// Byte usage over all records, whatever their encryption state.
    ///
    /// Sealed payloads carry a fixed per-field overhead which is included as
    /// stored.
    pub fn estimate_usage(&self) -> VaultResult<UsageEstimate> {
        let totals = self.inner.payload_totals()?;
        Ok(UsageEstimate {
            photos: totals.photos,
            encrypted_photos: totals.encrypted_photos,
            payload_bytes: totals.primary_bytes + totals.thumbnail_bytes,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    fn reveal(&self, record: StoredPhoto) -> VaultResult<Photo> {
        if !record.encrypted {
            return Ok(record.photo);
        }

        let key = self.session.key().ok_or(VaultError::VaultLocked)?;
        open_photo(&key, record.photo)
    }

    fn reveal_all(&self, records: Vec<StoredPhoto>) -> VaultResult<Vec<Photo>> {
        records.into_iter().map(|record| self.reveal(record)).collect()
    }
}

/// Seal both payloads independently, each with its own nonce
fn seal_photo(key: &VaultKey, photo: &Photo) -> VaultResult<StoredPhoto> {
    let mut sealed = photo.clone();
    sealed.primary_payload = seal(key, &photo.primary_payload)?;
    sealed.thumbnail_payload = seal(key, &photo.thumbnail_payload)?;

    Ok(StoredPhoto {
        photo: sealed,
        encrypted: true,
    })
}

fn open_photo(key: &VaultKey, mut photo: Photo) -> VaultResult<Photo> {
    photo.primary_payload = open(key, &photo.primary_payload)
        .map_err(|_| VaultError::DecryptionFailed(format!("photo {} payload", photo.id)))?;
    photo.thumbnail_payload = open(key, &photo.thumbnail_payload)
        .map_err(|_| VaultError::DecryptionFailed(format!("photo {} thumbnail", photo.id)))?;
    Ok(photo)
}
