//! pixvault - Photo Vault
//!
//! Entry point tying together the vault directory, configuration, key
//! session, encrypted store, backup handle and scheduler.
//!
//! ```text
//! <root>/
//! ├── config.json           VaultConfig
//! ├── backup_handle.json    granted backup location (optional)
//! └── db/vault.db           photos, albums, crypto config, settings
//! ```

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::advisor::{self, FilesystemHost, StorageAdvisor};
use crate::backup::{self, ExportSummary, ImportSummary};
use crate::config::{VaultConfig, CONFIG_FILE};
use crate::crypto::{CryptoConfig, KeySession};
use crate::error::{VaultError, VaultResult};
use crate::handles::{BackupHandleRecord, HandleStore};
use crate::ingest::Ingestor;
use crate::scheduler::{self, AutoBackupScheduler, SchedulerConfig, StatusSink, StoreBackupSource};
use crate::store::{Album, EncryptedStore, Photo, SqliteStore, Store, UsageEstimate};
use crate::target::{BackupTarget, DirectoryTarget, PermissionState};

/// Database location inside the vault root
pub const DB_PATH: &str = "db/vault.db";

/// Photo Vault - Main entry point
pub struct PhotoVault {
    /// Vault root path
    root: PathBuf,
    /// Configuration
    config: RwLock<VaultConfig>,
    /// Active key, shared with the store
    session: Arc<KeySession>,
    store: Arc<EncryptedStore<SqliteStore>>,
    handles: Arc<HandleStore>,
    /// Notified on every data change, once attached
    scheduler: RwLock<Option<AutoBackupScheduler>>,
}

impl PhotoVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new, unencrypted vault at the given path
    pub fn create<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();

        if root.join(CONFIG_FILE).exists() {
            return Err(VaultError::VaultAlreadyExists(root.display().to_string()));
        }

        std::fs::create_dir_all(&root)?;
        let config = VaultConfig::load_or_create(&root)?;

        log::info!("Created vault at {}", root.display());
        Self::assemble(root, config)
    }

    /// Open an existing vault. It starts locked.
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.join(CONFIG_FILE).exists() {
            return Err(VaultError::VaultNotFound(root.display().to_string()));
        }

        let config = VaultConfig::load(&root)?;
        Self::assemble(root, config)
    }

    fn assemble(root: PathBuf, config: VaultConfig) -> VaultResult<Self> {
        let session = Arc::new(KeySession::new());
        let raw = SqliteStore::open(&root.join(DB_PATH))?;
        let store = Arc::new(EncryptedStore::new(raw, Arc::clone(&session)));
        let handles = Arc::new(HandleStore::load(&root)?);

        Ok(Self {
            root,
            config: RwLock::new(config),
            session,
            store,
            handles,
            scheduler: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> VaultConfig {
        self.config.read().clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENCRYPTION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_encryption_enabled(&self) -> VaultResult<bool> {
        Ok(self.store.raw().crypto_config()?.is_some())
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    /// Turn on encryption and migrate every photo.
    ///
    /// The crypto config is persisted before migrating, so after an
    /// interruption [`unlock`](Self::unlock) plus
    /// [`encrypt_pending`](Self::encrypt_pending) finish the job.
    pub fn enable_encryption(
        &self,
        password: &str,
        on_progress: impl FnMut(usize, usize),
    ) -> VaultResult<usize> {
        if self.is_encryption_enabled()? {
            return Err(VaultError::EncryptionAlreadyEnabled);
        }

        let (crypto, key) = CryptoConfig::create(password)?;
        self.store.raw().save_crypto_config(&crypto)?;
        self.session.set_key(Some(key));

        log::info!("Encryption enabled");
        self.store.encrypt_all(on_progress)
    }

    /// Encrypt whatever is still plaintext in an encrypted vault
    pub fn encrypt_pending(&self, on_progress: impl FnMut(usize, usize)) -> VaultResult<usize> {
        if !self.is_encryption_enabled()? {
            return Err(VaultError::EncryptionNotEnabled);
        }

        self.store.encrypt_all(on_progress)
    }

    /// Check `password` and make its key active
    pub fn unlock(&self, password: &str) -> VaultResult<()> {
        let crypto = self
            .store
            .raw()
            .crypto_config()?
            .ok_or(VaultError::EncryptionNotEnabled)?;

        let key = crypto.unlock(password)?;
        self.session.set_key(Some(key));

        log::info!("Vault unlocked");
        Ok(())
    }

    /// Drop the active key
    pub fn lock(&self) {
        self.session.clear();
        log::info!("Vault locked");
    }

    /// Decrypt every photo, then forget the crypto config and the key
    pub fn disable_encryption(&self, on_progress: impl FnMut(usize, usize)) -> VaultResult<usize> {
        if !self.is_encryption_enabled()? {
            return Err(VaultError::EncryptionNotEnabled);
        }
        if !self.is_unlocked() {
            return Err(VaultError::VaultLocked);
        }

        let migrated = self.store.decrypt_all(on_progress)?;

        let remaining = self.store.encrypted_count()?;
        if remaining > 0 {
            return Err(VaultError::EncryptedRecordsRemain(remaining));
        }

        self.store.raw().clear_crypto_config()?;
        self.session.clear();

        log::info!("Encryption disabled");
        Ok(migrated)
    }

    /// Encrypted vaults need an active key for every data operation
    fn ensure_accessible(&self) -> VaultResult<()> {
        if !self.is_unlocked() && self.is_encryption_enabled()? {
            return Err(VaultError::VaultLocked);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTOS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_photo(&self, photo: &Photo) -> VaultResult<()> {
        self.ensure_accessible()?;
        self.store.put(photo)?;
        self.notify_change();
        Ok(())
    }

    /// Decode, thumbnail and add an image file
    pub fn import_file(&self, path: &Path) -> VaultResult<Photo> {
        self.ensure_accessible()?;

        let photo = Ingestor::new(self.config.read().thumb_size).ingest_file(path)?;
        self.add_photo(&photo)?;

        log::info!("Added {} as {}", path.display(), photo.id);
        Ok(photo)
    }

    pub fn photo(&self, id: &str) -> VaultResult<Option<Photo>> {
        self.ensure_accessible()?;
        self.store.get(id)
    }

    /// All photos, newest first
    pub fn photos(&self) -> VaultResult<Vec<Photo>> {
        self.ensure_accessible()?;
        self.store.get_all()
    }

    pub fn photos_in_album(&self, album_id: &str) -> VaultResult<Vec<Photo>> {
        self.ensure_accessible()?;
        self.store.get_by_album(album_id)
    }

    pub fn delete_photo(&self, id: &str) -> VaultResult<bool> {
        self.ensure_accessible()?;
        let deleted = self.store.delete(id)?;
        if deleted {
            self.notify_change();
        }
        Ok(deleted)
    }

    pub fn rename_photo(&self, id: &str, name: &str) -> VaultResult<()> {
        self.ensure_accessible()?;
        self.store.rename_photo(id, name)?;
        self.notify_change();
        Ok(())
    }

    /// Add a photo to an existing album
    pub fn add_to_album(&self, photo_id: &str, album_id: &str) -> VaultResult<()> {
        self.ensure_accessible()?;

        if self.store.get_album(album_id)?.is_none() {
            return Err(VaultError::AlbumNotFound(album_id.to_string()));
        }

        let mut album_ids = self
            .store
            .raw()
            .get_photo(photo_id)?
            .ok_or_else(|| VaultError::PhotoNotFound(photo_id.to_string()))?
            .photo
            .album_ids;

        if album_ids.insert(album_id.to_string()) {
            self.store.set_photo_albums(photo_id, album_ids)?;
            self.notify_change();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ALBUMS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn create_album(&self, name: &str, icon: &str) -> VaultResult<Album> {
        self.ensure_accessible()?;

        let album = Album::new(name, icon);
        self.store.put_album(&album)?;
        self.notify_change();
        Ok(album)
    }

    pub fn albums(&self) -> VaultResult<Vec<Album>> {
        self.ensure_accessible()?;
        self.store.get_albums()
    }

    /// Delete an album; member photos stay, minus the membership
    pub fn delete_album(&self, id: &str) -> VaultResult<bool> {
        self.ensure_accessible()?;
        let deleted = self.store.delete_album(id)?;
        if deleted {
            self.notify_change();
        }
        Ok(deleted)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BACKUP
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a backup archive of plaintext images to `writer`
    pub fn export_backup<W: Write + Seek>(
        &self,
        writer: W,
        on_progress: impl FnMut(usize, usize),
    ) -> VaultResult<ExportSummary> {
        self.ensure_accessible()?;
        backup::export(&*self.store, writer, on_progress)
    }

    /// Merge a backup archive into the vault
    pub fn import_backup<R: Read + Seek>(
        &self,
        reader: R,
        on_progress: impl FnMut(usize, usize),
    ) -> VaultResult<ImportSummary> {
        self.ensure_accessible()?;

        let summary = backup::import(&*self.store, reader, on_progress)?;
        if summary.photos_imported > 0 || summary.albums_imported > 0 {
            self.notify_change();
        }
        Ok(summary)
    }

    /// Grant automatic backups to `location`, creating it if needed
    pub fn set_backup_location(&self, location: &Path) -> VaultResult<()> {
        let target = DirectoryTarget::new(location);
        if target.request_permission() != PermissionState::Granted {
            return Err(VaultError::PermissionDenied(target.describe()));
        }

        self.handles.save(BackupHandleRecord::new(location))?;
        self.notify_change();
        Ok(())
    }

    /// Forget the backup location; photos and albums are untouched
    pub fn clear_backup_location(&self) -> VaultResult<()> {
        if let Some(scheduler) = self.scheduler.read().as_ref() {
            scheduler.cancel();
        }
        self.handles.clear()
    }

    pub fn backup_location(&self) -> Option<BackupHandleRecord> {
        self.handles.get()
    }

    /// Build the automatic backup scheduler and attach it to this vault, so
    /// every change from now on schedules a backup
    pub fn scheduler(&self, status_sink: Option<StatusSink>) -> AutoBackupScheduler {
        let source = StoreBackupSource::new(Arc::clone(&self.store), Arc::clone(&self.handles));
        let config = SchedulerConfig::from(&self.config.read().backup);
        let scheduler = AutoBackupScheduler::new(config, Arc::new(source), status_sink);

        if let Some(previous) = self.scheduler.write().replace(scheduler.clone()) {
            previous.cancel();
        }
        scheduler
    }

    fn notify_change(&self) {
        if let Some(scheduler) = self.scheduler.read().as_ref() {
            scheduler.schedule();
        }
    }

    pub fn last_backup(&self) -> VaultResult<Option<DateTime<Utc>>> {
        scheduler::read_last_backup(self.store.raw())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STORAGE
    // ═══════════════════════════════════════════════════════════════════════

    /// Byte and record totals; available while locked
    pub fn usage(&self) -> VaultResult<UsageEstimate> {
        self.advisor().estimate(&*self.store)
    }

    pub fn encrypted_count(&self) -> VaultResult<usize> {
        self.store.encrypted_count()
    }

    pub fn backup_reminder_due(&self) -> VaultResult<bool> {
        let photos = self.usage()?.photos;
        Ok(self.advisor().is_due(photos, self.last_backup()?, Utc::now()))
    }

    pub fn request_durable_storage(&self) -> bool {
        advisor::request_durable_storage(&FilesystemHost::new(&self.root))
    }

    fn advisor(&self) -> StorageAdvisor {
        StorageAdvisor::new(self.config.read().reminder_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::BackupStatus;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(name: &str) -> Photo {
        Photo::new(name, 2, 2, format!("img:{}", name).into_bytes(), b"thumb".to_vec())
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vault");

        let vault = PhotoVault::create(&root).unwrap();
        assert!(root.join(CONFIG_FILE).exists());
        assert!(root.join(DB_PATH).exists());
        assert!(!vault.is_encryption_enabled().unwrap());
        drop(vault);

        assert!(matches!(
            PhotoVault::create(&root),
            Err(VaultError::VaultAlreadyExists(_))
        ));
        assert!(PhotoVault::open(&root).is_ok());
        assert!(matches!(
            PhotoVault::open(dir.path().join("missing")),
            Err(VaultError::VaultNotFound(_))
        ));
    }

    #[test]
    fn test_password_lifecycle_across_reopen() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path()).unwrap();
        let photo = sample("kept.jpg");
        vault.add_photo(&photo).unwrap();

        let mut progress = Vec::new();
        let migrated = vault
            .enable_encryption("correct-horse", |d, t| progress.push((d, t)))
            .unwrap();
        assert_eq!(migrated, 1);
        assert_eq!(progress, vec![(1, 1)]);
        assert!(matches!(
            vault.enable_encryption("other", crate::no_progress),
            Err(VaultError::EncryptionAlreadyEnabled)
        ));
        drop(vault);

        let vault = PhotoVault::open(dir.path()).unwrap();
        assert!(vault.is_encryption_enabled().unwrap());
        assert!(!vault.is_unlocked());
        assert!(matches!(vault.photos(), Err(VaultError::VaultLocked)));
        assert!(matches!(vault.add_photo(&sample("x")), Err(VaultError::VaultLocked)));

        let err = vault.unlock("battery-staple").unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
        assert!(err.is_retryable());
        assert!(!vault.is_unlocked());

        vault.unlock("correct-horse").unwrap();
        assert_eq!(vault.photos().unwrap(), vec![photo]);

        // Usage works whatever the lock state
        vault.lock();
        assert_eq!(vault.usage().unwrap().encrypted_photos, 1);
    }

    #[test]
    fn test_interrupted_enable_resumes() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path()).unwrap();
        for i in 0..3 {
            vault.add_photo(&sample(&format!("{}.jpg", i))).unwrap();
        }

        // Crash right after the config was written
        let (crypto, _) = CryptoConfig::create("pw").unwrap();
        vault.store.raw().save_crypto_config(&crypto).unwrap();

        let vault = PhotoVault::open(dir.path()).unwrap();
        vault.unlock("pw").unwrap();
        assert_eq!(vault.encrypted_count().unwrap(), 0);
        assert_eq!(vault.encrypt_pending(crate::no_progress).unwrap(), 3);
        assert_eq!(vault.encrypted_count().unwrap(), 3);
        assert_eq!(vault.photos().unwrap().len(), 3);
    }

    #[test]
    fn test_disable_encryption() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path()).unwrap();
        vault.enable_encryption("pw", crate::no_progress).unwrap();
        vault.add_photo(&sample("a.jpg")).unwrap();
        vault.add_photo(&sample("b.jpg")).unwrap();

        vault.lock();
        assert!(matches!(
            vault.disable_encryption(crate::no_progress),
            Err(VaultError::VaultLocked)
        ));

        vault.unlock("pw").unwrap();
        assert_eq!(vault.disable_encryption(crate::no_progress).unwrap(), 2);
        assert!(!vault.is_encryption_enabled().unwrap());
        assert!(!vault.is_unlocked());
        assert_eq!(vault.photos().unwrap().len(), 2);
        assert!(matches!(vault.unlock("pw"), Err(VaultError::EncryptionNotEnabled)));
    }

    #[test]
    fn test_album_membership_and_cascade() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path()).unwrap();
        let album = vault.create_album("Pets", "🐈").unwrap();
        let photo = sample("cat.jpg");
        vault.add_photo(&photo).unwrap();

        vault.add_to_album(&photo.id, &album.id).unwrap();
        assert_eq!(vault.photos_in_album(&album.id).unwrap().len(), 1);
        assert!(matches!(
            vault.add_to_album(&photo.id, "nope"),
            Err(VaultError::AlbumNotFound(_))
        ));

        assert!(vault.delete_album(&album.id).unwrap());
        assert!(vault.albums().unwrap().is_empty());
        assert!(vault.photo(&photo.id).unwrap().unwrap().album_ids.is_empty());

        assert!(vault.delete_photo(&photo.id).unwrap());
        assert!(!vault.delete_photo(&photo.id).unwrap());
    }

    #[test]
    fn test_backup_between_vaults() {
        let dir = tempdir().unwrap();
        let source = PhotoVault::create(dir.path().join("a")).unwrap();
        source.enable_encryption("pw", crate::no_progress).unwrap();
        source.create_album("Trip", "✈").unwrap();
        source.add_photo(&sample("1.jpg")).unwrap();

        let mut archive = Cursor::new(Vec::new());
        source.export_backup(&mut archive, crate::no_progress).unwrap();

        // Restorable without the source password
        let target = PhotoVault::create(dir.path().join("b")).unwrap();
        archive.set_position(0);
        let summary = target.import_backup(archive, crate::no_progress).unwrap();
        assert_eq!(summary.photos_imported, 1);
        assert_eq!(summary.albums_imported, 1);
        assert_eq!(target.photos().unwrap(), source.photos().unwrap());
    }

    #[test]
    fn test_backup_location_and_reminder() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("vault")).unwrap();
        vault.add_photo(&sample("a.jpg")).unwrap();
        assert!(vault.backup_reminder_due().unwrap());

        let scheduler = vault.scheduler(None);
        assert!(matches!(scheduler.run_now(), Err(VaultError::BackupNotConfigured)));

        let out = dir.path().join("backups");
        vault.set_backup_location(&out).unwrap();
        let report = scheduler.run_now().unwrap();
        assert!(report.path.starts_with(&out));
        assert!(!vault.backup_reminder_due().unwrap());
        assert!(vault.last_backup().unwrap().is_some());

        vault.clear_backup_location().unwrap();
        assert!(vault.backup_location().is_none());
        assert_eq!(vault.photos().unwrap().len(), 1);
    }

    #[test]
    fn test_denied_backup_location_is_not_saved() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("vault")).unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        assert!(matches!(
            vault.set_backup_location(&blocker.join("sub")),
            Err(VaultError::PermissionDenied(_))
        ));
        assert!(vault.backup_location().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_trigger_automatic_backup() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("vault")).unwrap();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink_statuses = Arc::clone(&statuses);
        let sink: StatusSink =
            Arc::new(move |s: &BackupStatus| sink_statuses.lock().push(s.clone()));
        let _scheduler = vault.scheduler(Some(sink));

        vault.set_backup_location(&dir.path().join("out")).unwrap();
        vault.add_photo(&sample("a.jpg")).unwrap();
        vault.create_album("New", "+").unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;

        let completed = statuses
            .lock()
            .iter()
            .filter(|s| matches!(s, BackupStatus::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(vault.last_backup().unwrap().is_some());
    }

    #[test]
    fn test_import_file() {
        let dir = tempdir().unwrap();
        let vault = PhotoVault::create(dir.path().join("vault")).unwrap();

        let image_path = dir.path().join("pic.png");
        let img = image::DynamicImage::new_rgb8(40, 20);
        img.save(&image_path).unwrap();

        let photo = vault.import_file(&image_path).unwrap();
        assert_eq!((photo.width, photo.height), (40, 20));
        assert_eq!(vault.photos().unwrap().len(), 1);
    }
}
