//! pixvault - Backup Archives
//!
//! Portable zip archive of the whole vault: `manifest.json` with album and
//! photo metadata, plus one entry per payload under `photos/` and
//! `thumbnails/`, named by photo id.
//!
//! Payloads are read through the decrypt path, so an archive always holds
//! plaintext images. It stays restorable without the vault password and
//! carries no confidentiality of its own.

use std::collections::{BTreeSet, HashSet};
use std::io::{Read, Seek, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{VaultError, VaultResult};
use crate::sanitize::{sanitize_icon, sanitize_name};
use crate::store::{Album, EncryptedStore, Photo, Store};

pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Marker identifying our archives
pub const FORMAT_MARKER: &str = "pixvault-backup";

/// The only manifest version this build reads and writes
pub const FORMAT_VERSION: u32 = 1;

/// Largest entry read back from an archive; anything bigger is unusable
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Archive entry holding a photo's full-size payload
pub fn primary_entry(photo_id: &str) -> String {
    format!("photos/{}", photo_id)
}

/// Archive entry holding a photo's thumbnail payload
pub fn thumbnail_entry(photo_id: &str) -> String {
    format!("thumbnails/{}", photo_id)
}

// ═══════════════════════════════════════════════════════════════════════════
// MANIFEST
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    #[serde(default)]
    pub format: String,
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub albums: Vec<Album>,
    #[serde(default)]
    pub photos: Vec<PhotoEntry>,
}

/// Photo metadata without payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub album_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub primary_entry: String,
    #[serde(default)]
    pub thumbnail_entry: String,
}

impl From<&Photo> for PhotoEntry {
    fn from(photo: &Photo) -> Self {
        Self {
            id: photo.id.clone(),
            name: photo.name.clone(),
            album_ids: photo.album_ids.clone(),
            created_at: photo.created_at,
            width: photo.width,
            height: photo.height,
            primary_entry: primary_entry(&photo.id),
            thumbnail_entry: thumbnail_entry(&photo.id),
        }
    }
}

/// Result of an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub photos_exported: usize,
    pub albums_exported: usize,
}

/// Result of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub photos_imported: usize,
    pub albums_imported: usize,
    /// Photos left out because a payload entry was missing, unreadable or
    /// the id unusable
    pub photos_skipped: usize,
    /// Photos whose id already existed in the store
    pub photos_already_present: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// EXPORT
// ═══════════════════════════════════════════════════════════════════════════

/// Write every album and photo of `store` into a zip archive on `writer`.
///
/// Fails with `VaultLocked` if encrypted photos exist and no key is active.
pub fn export<S, W>(
    store: &EncryptedStore<S>,
    writer: W,
    mut on_progress: impl FnMut(usize, usize),
) -> VaultResult<ExportSummary>
where
    S: Store,
    W: Write + Seek,
{
    let albums = store.get_albums()?;
    let photos = store.get_all()?;
    let total = photos.len();

    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(total);
    for (done, photo) in photos.iter().enumerate() {
        let entry = PhotoEntry::from(photo);

        zip.start_file(entry.primary_entry.as_str(), options)?;
        zip.write_all(&photo.primary_payload)?;
        zip.start_file(entry.thumbnail_entry.as_str(), options)?;
        zip.write_all(&photo.thumbnail_payload)?;

        entries.push(entry);
        on_progress(done + 1, total);
    }

    let manifest = BackupManifest {
        format: FORMAT_MARKER.to_string(),
        format_version: FORMAT_VERSION,
        exported_at: Utc::now(),
        albums,
        photos: entries,
    };

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.finish()?;

    log::info!(
        "Exported backup: {} photos, {} albums",
        manifest.photos.len(),
        manifest.albums.len()
    );

    Ok(ExportSummary {
        photos_exported: manifest.photos.len(),
        albums_exported: manifest.albums.len(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// IMPORT
// ═══════════════════════════════════════════════════════════════════════════

/// Read and validate the manifest without touching any store
pub fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>) -> VaultResult<BackupManifest> {
    let data = read_entry(archive, MANIFEST_ENTRY)?.ok_or_else(|| {
        VaultError::InvalidBackup("not a recognized backup: manifest.json is missing".into())
    })?;

    let manifest: BackupManifest = serde_json::from_slice(&data).map_err(|e| {
        VaultError::InvalidBackup(format!("not a recognized backup: malformed manifest ({})", e))
    })?;

    if manifest.format != FORMAT_MARKER {
        return Err(VaultError::InvalidBackup(format!(
            "not a recognized backup: unexpected format marker {:?}",
            manifest.format
        )));
    }

    if manifest.format_version != FORMAT_VERSION {
        return Err(VaultError::InvalidBackup(format!(
            "not a recognized backup: unsupported format version {}",
            manifest.format_version
        )));
    }

    Ok(manifest)
}

/// Merge an archive into `store`.
///
/// Existing ids are never overwritten, so importing the same archive twice
/// has the effect of importing it once. The manifest is validated before
/// anything is written.
pub fn import<S, R>(
    store: &EncryptedStore<S>,
    reader: R,
    mut on_progress: impl FnMut(usize, usize),
) -> VaultResult<ImportSummary>
where
    S: Store,
    R: Read + Seek,
{
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        VaultError::InvalidBackup(format!("not a recognized backup archive ({})", e))
    })?;
    let manifest = read_manifest(&mut archive)?;

    let mut summary = ImportSummary::default();

    let mut known_albums: HashSet<String> =
        store.get_albums()?.into_iter().map(|album| album.id).collect();

    for album in &manifest.albums {
        if !is_usable_id(&album.id) || known_albums.contains(&album.id) {
            continue;
        }

        let imported = Album {
            id: album.id.clone(),
            name: sanitize_name(&album.name, "Album"),
            icon: sanitize_icon(&album.icon),
            created_at: album.created_at,
        };
        store.put_album(&imported)?;
        known_albums.insert(imported.id);
        summary.albums_imported += 1;
    }

    let total = manifest.photos.len();
    for (done, entry) in manifest.photos.iter().enumerate() {
        import_photo(store, &mut archive, entry, &known_albums, &mut summary)?;
        on_progress(done + 1, total);
    }

    log::info!(
        "Imported backup: {} photos, {} albums ({} skipped, {} already present)",
        summary.photos_imported,
        summary.albums_imported,
        summary.photos_skipped,
        summary.photos_already_present
    );

    Ok(summary)
}

fn import_photo<S, R>(
    store: &EncryptedStore<S>,
    archive: &mut ZipArchive<R>,
    entry: &PhotoEntry,
    known_albums: &HashSet<String>,
    summary: &mut ImportSummary,
) -> VaultResult<()>
where
    S: Store,
    R: Read + Seek,
{
    if !is_usable_id(&entry.id) {
        log::warn!("Skipping photo with unusable id {:?}", entry.id);
        summary.photos_skipped += 1;
        return Ok(());
    }

    if store.raw().get_photo(&entry.id)?.is_some() {
        summary.photos_already_present += 1;
        return Ok(());
    }

    let payloads = read_entry(archive, &primary_entry(&entry.id)).and_then(|primary| {
        read_entry(archive, &thumbnail_entry(&entry.id)).map(|thumbnail| (primary, thumbnail))
    });

    let (primary_payload, thumbnail_payload) = match payloads {
        Ok((Some(primary), Some(thumbnail))) => (primary, thumbnail),
        Ok(_) => {
            log::warn!("Skipping photo {}: payload entry missing", entry.id);
            summary.photos_skipped += 1;
            return Ok(());
        }
        Err(e) => {
            log::warn!("Skipping photo {}: {}", entry.id, e);
            summary.photos_skipped += 1;
            return Ok(());
        }
    };

    let photo = Photo {
        id: entry.id.clone(),
        name: sanitize_name(&entry.name, "photo"),
        album_ids: entry
            .album_ids
            .iter()
            .filter(|id| known_albums.contains(*id))
            .cloned()
            .collect(),
        created_at: entry.created_at,
        width: entry.width,
        height: entry.height,
        primary_payload,
        thumbnail_payload,
    };

    store.put(&photo)?;
    summary.photos_imported += 1;
    Ok(())
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> VaultResult<Option<Vec<u8>>> {
    read_entry_limited(archive, name, MAX_ENTRY_BYTES)
}

/// Read a whole entry, `None` if absent.
///
/// The sizes in entry headers are not trusted: at most `limit` bytes are
/// read, and damaged or oversized entries come back as `InvalidBackup`.
fn read_entry_limited<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> VaultResult<Option<Vec<u8>>> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(VaultError::InvalidBackup(format!("{}: {}", name, e))),
    };

    let mut data = Vec::new();
    file.take(limit + 1)
        .read_to_end(&mut data)
        .map_err(|e| VaultError::InvalidBackup(format!("{}: {}", name, e)))?;

    if data.len() as u64 > limit {
        return Err(VaultError::InvalidBackup(format!("{}: larger than {} bytes", name, limit)));
    }
    Ok(Some(data))
}

/// Ids end up in entry names and primary keys
fn is_usable_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && !id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}
