//! pixvault - Backup Targets
//!
//! External write locations for unattended backups. Every write goes to a
//! partial file first and only becomes visible under its final name once
//! fully flushed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Suffix of in-flight writes
const PARTIAL_SUFFIX: &str = ".partial";

/// Permission state of a backup location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    /// Not yet decided; a request may grant it
    Prompt,
    Denied,
}

/// A location backups can be written to
pub trait BackupTarget: Send + Sync {
    /// Human readable location, for status and logs
    fn describe(&self) -> String;

    /// Current permission, without side effects
    fn query_permission(&self) -> PermissionState;

    /// Ask for write permission
    fn request_permission(&self) -> PermissionState;

    /// Open a scoped writer for `file_name`.
    ///
    /// Nothing appears under the final name until [`PartialFile::commit`];
    /// dropping the writer uncommitted removes what was written.
    fn create(&self, file_name: &str) -> VaultResult<PartialFile>;
}

/// Backup target backed by a plain directory
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BackupTarget for DirectoryTarget {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn query_permission(&self) -> PermissionState {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => PermissionState::Granted,
            Ok(_) => PermissionState::Denied,
            Err(e) if e.kind() == io::ErrorKind::NotFound => PermissionState::Prompt,
            Err(_) => PermissionState::Denied,
        }
    }

    fn request_permission(&self) -> PermissionState {
        match self.query_permission() {
            PermissionState::Prompt => match fs::create_dir_all(&self.root) {
                Ok(()) => self.query_permission(),
                Err(e) => {
                    log::warn!("Cannot create backup directory {}: {}", self.root.display(), e);
                    PermissionState::Denied
                }
            },
            state => state,
        }
    }

    fn create(&self, file_name: &str) -> VaultResult<PartialFile> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(VaultError::PermissionDenied(format!(
                "invalid backup file name: {:?}",
                file_name
            )));
        }

        PartialFile::create(self.root.join(file_name))
    }
}

/// A file being written next to its final destination.
///
/// Implements `Write` and `Seek`, so it can back a zip writer directly.
pub struct PartialFile {
    file: Option<File>,
    partial: PathBuf,
    dest: PathBuf,
}

impl PartialFile {
    fn create(dest: PathBuf) -> VaultResult<Self> {
        let mut partial = dest.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial)?;

        Ok(Self {
            file: Some(file),
            partial,
            dest,
        })
    }

    /// Flush, close and move into place, replacing any previous file
    pub fn commit(mut self) -> VaultResult<PathBuf> {
        let file = self.file.take();
        if let Err(e) = Self::persist(file, &self.partial, &self.dest) {
            if let Err(cleanup) = fs::remove_file(&self.partial) {
                log::warn!("Failed to remove {}: {}", self.partial.display(), cleanup);
            }
            return Err(e.into());
        }
        Ok(self.dest.clone())
    }

    fn persist(file: Option<File>, partial: &Path, dest: &Path) -> io::Result<()> {
        if let Some(mut file) = file {
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(partial, dest)
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "partial file already closed"))
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Seek for PartialFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        // Still open means never committed
        if self.file.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial) {
                log::warn!("Failed to remove {}: {}", self.partial.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_commit_moves_into_place() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path());
        assert_eq!(target.query_permission(), PermissionState::Granted);

        let mut writer = target.create("backup.zip").unwrap();
        writer.write_all(b"archive bytes").unwrap();
        assert!(!dir.path().join("backup.zip").exists());

        let path = writer.commit().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"archive bytes");
        assert!(!dir.path().join("backup.zip.partial").exists());
    }

    #[test]
    fn test_commit_overwrites_existing() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path());
        fs::write(dir.path().join("same-day.zip"), b"old").unwrap();

        let mut writer = target.create("same-day.zip").unwrap();
        writer.write_all(b"new").unwrap();
        writer.commit().unwrap();

        assert_eq!(fs::read(dir.path().join("same-day.zip")).unwrap(), b"new");
    }

    #[test]
    fn test_drop_without_commit_cleans_up() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path());

        {
            let mut writer = target.create("aborted.zip").unwrap();
            writer.write_all(b"half").unwrap();
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_commit_cleans_up() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path());

        // A non-empty directory in the way makes the rename fail
        let blocked = dir.path().join("blocked.zip");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();

        let mut writer = target.create("blocked.zip").unwrap();
        writer.write_all(b"archive bytes").unwrap();
        assert!(writer.commit().is_err());

        assert!(!dir.path().join("blocked.zip.partial").exists());
        assert!(blocked.join("keep").exists());
    }

    #[test]
    fn test_request_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(&dir.path().join("nested/backups"));

        assert_eq!(target.query_permission(), PermissionState::Prompt);
        assert_eq!(target.request_permission(), PermissionState::Granted);
        assert!(target.root().is_dir());
    }

    #[test]
    fn test_request_denied_under_regular_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let target = DirectoryTarget::new(&blocker.join("backups"));
        assert_ne!(target.request_permission(), PermissionState::Granted);

        let plain_file = DirectoryTarget::new(&blocker);
        assert_eq!(plain_file.query_permission(), PermissionState::Denied);
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path());
        assert!(target.create("../escape.zip").is_err());
        assert!(target.create("").is_err());
    }
}
