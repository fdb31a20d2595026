//! pixvault - SQLite Store
//!
//! Photo, album and settings tables in a single SQLite database. Schema
//! upgrades only ever add tables and columns.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Album, PayloadTotals, Photo, Store, StoredPhoto};
use crate::crypto::{CryptoConfig, NONCE_LEN, SALT_LEN};
use crate::error::{VaultError, VaultResult};

/// Schema steps; entry `n` upgrades `user_version` n to n + 1
const MIGRATIONS: &[&str] = &[
    // v1: photos
    r#"
    CREATE TABLE IF NOT EXISTS photos (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        encrypted INTEGER NOT NULL DEFAULT 0,
        primary_payload BLOB NOT NULL,
        thumbnail_payload BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_photos_created ON photos(created_at);
    "#,
    // v2: albums and membership index
    r#"
    ALTER TABLE photos ADD COLUMN album_ids TEXT NOT NULL DEFAULT '[]';

    CREATE TABLE IF NOT EXISTS albums (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        icon TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS photo_albums (
        photo_id TEXT NOT NULL,
        album_id TEXT NOT NULL,
        PRIMARY KEY (photo_id, album_id)
    );

    CREATE INDEX IF NOT EXISTS idx_photo_albums_album ON photo_albums(album_id);
    "#,
    // v3: encryption config and settings
    r#"
    CREATE TABLE IF NOT EXISTS crypto_config (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        salt BLOB NOT NULL,
        verify_iv BLOB NOT NULL,
        verify_ciphertext BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

/// Current schema version
pub const SCHEMA_VERSION: usize = MIGRATIONS.len();

const PHOTO_COLUMNS: &str = "p.id, p.name, p.album_ids, p.created_at, p.width, p.height, \
     p.encrypted, p.primary_payload, p.thumbnail_payload";

/// SQLite-backed [`Store`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date
    pub fn open(path: &Path) -> VaultResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Throwaway in-memory database
    pub fn open_in_memory() -> VaultResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, applying pending schema upgrades
    pub fn from_connection(mut conn: Connection) -> VaultResult<Self> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Schema version recorded in the database
    pub fn schema_version(&self) -> VaultResult<usize> {
        let conn = self.conn.lock();
        Ok(user_version(&conn)?)
    }

    fn query_photos(&self, sql: &str, album_id: Option<&str>) -> VaultResult<Vec<StoredPhoto>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;

        let rows = match album_id {
            Some(album_id) => stmt.query_map(params![album_id], PhotoRow::from_row)?,
            None => stmt.query_map([], PhotoRow::from_row)?,
        };

        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?.into_record()?);
        }

        Ok(photos)
    }
}

fn user_version(conn: &Connection) -> rusqlite::Result<usize> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version.max(0) as usize)
}

fn migrate(conn: &mut Connection) -> VaultResult<()> {
    let current = user_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(VaultError::VaultCorrupted(format!(
            "database schema v{} is newer than supported v{}",
            current, SCHEMA_VERSION
        )));
    }

    for (step, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", (step + 1) as i64)?;
        tx.commit()?;
        log::info!("Store schema upgraded to v{}", step + 1);
    }

    Ok(())
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> VaultResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| VaultError::DeserializationError(format!("timestamp {:?}: {}", raw, e)))
}

/// Insert or replace a photo row and its album memberships
fn write_photo(conn: &Connection, record: &StoredPhoto) -> VaultResult<()> {
    let photo = &record.photo;
    let album_ids = serde_json::to_string(&photo.album_ids)?;

    conn.execute(
        "INSERT OR REPLACE INTO photos
            (id, name, album_ids, created_at, width, height, encrypted, primary_payload, thumbnail_payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            photo.id,
            photo.name,
            album_ids,
            format_time(&photo.created_at),
            photo.width,
            photo.height,
            record.encrypted,
            photo.primary_payload,
            photo.thumbnail_payload,
        ],
    )?;

    conn.execute("DELETE FROM photo_albums WHERE photo_id = ?1", params![photo.id])?;
    for album_id in &photo.album_ids {
        conn.execute(
            "INSERT OR IGNORE INTO photo_albums (photo_id, album_id) VALUES (?1, ?2)",
            params![photo.id, album_id],
        )?;
    }

    Ok(())
}

/// Row as read from SQLite, before JSON/timestamp parsing
struct PhotoRow {
    id: String,
    name: String,
    album_ids: String,
    created_at: String,
    width: u32,
    height: u32,
    encrypted: bool,
    primary_payload: Vec<u8>,
    thumbnail_payload: Vec<u8>,
}

impl PhotoRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            album_ids: row.get(2)?,
            created_at: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            encrypted: row.get(6)?,
            primary_payload: row.get(7)?,
            thumbnail_payload: row.get(8)?,
        })
    }

    fn into_record(self) -> VaultResult<StoredPhoto> {
        let album_ids: BTreeSet<String> = serde_json::from_str(&self.album_ids)
            .map_err(|e| {
                VaultError::DeserializationError(format!("album_ids of {}: {}", self.id, e))
            })?;

        Ok(StoredPhoto {
            photo: Photo {
                created_at: parse_time(&self.created_at)?,
                id: self.id,
                name: self.name,
                album_ids,
                width: self.width,
                height: self.height,
                primary_payload: self.primary_payload,
                thumbnail_payload: self.thumbnail_payload,
            },
            encrypted: self.encrypted,
        })
    }
}

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_album(
    (id, name, icon, created_at): (String, String, String, String),
) -> VaultResult<Album> {
    Ok(Album {
        id,
        name,
        icon,
        created_at: parse_time(&created_at)?,
    })
}

impl Store for SqliteStore {
    fn put_photo(&self, record: &StoredPhoto) -> VaultResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        write_photo(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn get_photo(&self, id: &str) -> VaultResult<Option<StoredPhoto>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM photos p WHERE p.id = ?1", PHOTO_COLUMNS),
                params![id],
                PhotoRow::from_row,
            )
            .optional()?;

        row.map(PhotoRow::into_record).transpose()
    }

    fn all_photos(&self) -> VaultResult<Vec<StoredPhoto>> {
        self.query_photos(
            &format!("SELECT {} FROM photos p ORDER BY p.created_at DESC", PHOTO_COLUMNS),
            None,
        )
    }

    fn photos_in_album(&self, album_id: &str) -> VaultResult<Vec<StoredPhoto>> {
        self.query_photos(
            &format!(
                "SELECT {} FROM photos p
                 INNER JOIN photo_albums a ON p.id = a.photo_id
                 WHERE a.album_id = ?1
                 ORDER BY p.created_at DESC",
                PHOTO_COLUMNS
            ),
            Some(album_id),
        )
    }

    fn photo_ids_by_state(&self, encrypted: bool) -> VaultResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id FROM photos WHERE encrypted = ?1 ORDER BY created_at DESC")?;
        let ids = stmt
            .query_map(params![encrypted], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn delete_photo(&self, id: &str) -> VaultResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM photo_albums WHERE photo_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM photos WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn payload_totals(&self) -> VaultResult<PayloadTotals> {
        let conn = self.conn.lock();
        let totals = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(encrypted), 0),
                    COALESCE(SUM(LENGTH(primary_payload)), 0),
                    COALESCE(SUM(LENGTH(thumbnail_payload)), 0)
             FROM photos",
            [],
            |row| {
                Ok(PayloadTotals {
                    photos: row.get::<_, i64>(0)? as usize,
                    encrypted_photos: row.get::<_, i64>(1)? as usize,
                    primary_bytes: row.get::<_, i64>(2)? as u64,
                    thumbnail_bytes: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(totals)
    }

    fn put_album(&self, album: &Album) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO albums (id, name, icon, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![album.id, album.name, album.icon, format_time(&album.created_at)],
        )?;
        Ok(())
    }

    fn get_album(&self, id: &str) -> VaultResult<Option<Album>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, name, icon, created_at FROM albums WHERE id = ?1",
                params![id],
                album_from_row,
            )
            .optional()?;

        row.map(into_album).transpose()
    }

    fn all_albums(&self) -> VaultResult<Vec<Album>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, icon, created_at FROM albums ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], album_from_row)?;

        let mut albums = Vec::new();
        for row in rows {
            albums.push(into_album(row?)?);
        }
        Ok(albums)
    }

    fn remove_album(&self, album_id: &str, rewritten: &[StoredPhoto]) -> VaultResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for record in rewritten {
            write_photo(&tx, record)?;
        }
        tx.execute("DELETE FROM photo_albums WHERE album_id = ?1", params![album_id])?;
        let removed = tx.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;

        tx.commit()?;
        Ok(removed > 0)
    }

    fn crypto_config(&self) -> VaultResult<Option<CryptoConfig>> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT salt, verify_iv, verify_ciphertext FROM crypto_config WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((salt, verify_iv, verify_ciphertext)) = row else {
            return Ok(None);
        };

        let salt: [u8; SALT_LEN] = salt
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::VaultCorrupted("crypto config salt length".into()))?;
        let verify_iv: [u8; NONCE_LEN] = verify_iv
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::VaultCorrupted("crypto config iv length".into()))?;

        Ok(Some(CryptoConfig {
            salt,
            verify_iv,
            verify_ciphertext,
        }))
    }

    fn save_crypto_config(&self, config: &CryptoConfig) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO crypto_config (id, salt, verify_iv, verify_ciphertext)
             VALUES (1, ?1, ?2, ?3)",
            params![
                config.salt.as_slice(),
                config.verify_iv.as_slice(),
                config.verify_ciphertext
            ],
        )?;
        Ok(())
    }

    fn clear_crypto_config(&self) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM crypto_config", [])?;
        Ok(())
    }

    fn setting(&self, key: &str) -> VaultResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn photo(name: &str, minutes_ago: i64) -> StoredPhoto {
        let mut photo = Photo::new(name, 4, 3, name.as_bytes().to_vec(), vec![1, 2, 3]);
        photo.created_at = Utc::now() - Duration::minutes(minutes_ago);
        StoredPhoto {
            photo,
            encrypted: false,
        }
    }

    #[test]
    fn test_photo_roundtrip_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = photo("old.jpg", 10);
        let new = photo("new.jpg", 1);
        store.put_photo(&old).unwrap();
        store.put_photo(&new).unwrap();

        let loaded = store.get_photo(old.id()).unwrap().unwrap();
        assert_eq!(loaded, old);

        let all = store.all_photos().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), new.id());

        assert!(store.get_photo("missing").unwrap().is_none());
    }

    #[test]
    fn test_album_membership_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        let album = Album::new("Trips", "✈");
        store.put_album(&album).unwrap();

        let mut member = photo("beach.jpg", 2);
        member.photo.album_ids.insert(album.id.clone());
        store.put_photo(&member).unwrap();
        store.put_photo(&photo("other.jpg", 1)).unwrap();

        let in_album = store.photos_in_album(&album.id).unwrap();
        assert_eq!(in_album.len(), 1);
        assert_eq!(in_album[0].id(), member.id());

        // Membership follows rewrites
        member.photo.album_ids.clear();
        store.put_photo(&member).unwrap();
        assert!(store.photos_in_album(&album.id).unwrap().is_empty());
    }

    #[test]
    fn test_remove_album_rewrites_photos() {
        let store = SqliteStore::open_in_memory().unwrap();
        let album = Album::new("Pets", "🐈");
        store.put_album(&album).unwrap();

        let mut member = photo("cat.jpg", 1);
        member.photo.album_ids.insert(album.id.clone());
        store.put_photo(&member).unwrap();

        member.photo.album_ids.remove(&album.id);
        assert!(store.remove_album(&album.id, &[member.clone()]).unwrap());

        assert!(store.get_album(&album.id).unwrap().is_none());
        assert!(store.get_photo(member.id()).unwrap().unwrap().photo.album_ids.is_empty());
        assert!(!store.remove_album(&album.id, &[]).unwrap());
    }

    #[test]
    fn test_state_scan_and_totals() {
        let store = SqliteStore::open_in_memory().unwrap();
        let plain = photo("a.jpg", 2);
        let mut sealed = photo("b.jpg", 1);
        sealed.encrypted = true;
        store.put_photo(&plain).unwrap();
        store.put_photo(&sealed).unwrap();

        assert_eq!(store.photo_ids_by_state(false).unwrap(), vec![plain.id().to_string()]);
        assert_eq!(store.photo_ids_by_state(true).unwrap(), vec![sealed.id().to_string()]);

        let totals = store.payload_totals().unwrap();
        assert_eq!(totals.photos, 2);
        assert_eq!(totals.encrypted_photos, 1);
        assert_eq!(totals.primary_bytes, 10);
        assert_eq!(totals.thumbnail_bytes, 6);

        assert!(store.delete_photo(plain.id()).unwrap());
        assert!(!store.delete_photo(plain.id()).unwrap());
    }

    #[test]
    fn test_crypto_config_and_settings() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.crypto_config().unwrap().is_none());

        let config = CryptoConfig {
            salt: [3u8; SALT_LEN],
            verify_iv: [4u8; NONCE_LEN],
            verify_ciphertext: vec![5u8; 34],
        };
        store.save_crypto_config(&config).unwrap();
        assert_eq!(store.crypto_config().unwrap(), Some(config));

        store.clear_crypto_config().unwrap();
        assert!(store.crypto_config().unwrap().is_none());

        store.set_setting("last_backup_at", "x").unwrap();
        assert_eq!(store.setting("last_backup_at").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_upgrade_from_v1_keeps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1i64).unwrap();
        conn.execute(
            "INSERT INTO photos (id, name, created_at, width, height, encrypted, primary_payload, thumbnail_payload)
             VALUES ('legacy', 'old.png', '2023-05-01T10:00:00.000000Z', 10, 20, 0, x'0102', x'03')",
            [],
        )
        .unwrap();

        let store = SqliteStore::from_connection(conn).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);

        let legacy = store.get_photo("legacy").unwrap().unwrap();
        assert!(legacy.photo.album_ids.is_empty());
        assert_eq!(legacy.photo.primary_payload, vec![1, 2]);
        assert!(!legacy.encrypted);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("vault.db");

        let record = photo("kept.jpg", 0);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_photo(&record).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_photo(record.id()).unwrap().unwrap(), record);
    }
}
