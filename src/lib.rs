//! # pixvault
//!
//! Local photo store with optional password encryption at rest, portable
//! backup archives and debounced automatic backups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        PHOTO VAULT                        │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │ KEY SESSION │─▶│  ENCRYPTED STORE │  │   INGEST     │  │
//! │  │ PBKDF2 key  │  │  AES-256-GCM     │  │  thumbnails  │  │
//! │  └─────────────┘  └────────┬─────────┘  └──────────────┘  │
//! │                            │                              │
//! │                   ┌────────┴─────────┐                    │
//! │                   │   SQLITE STORE   │                    │
//! │                   └──────────────────┘                    │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │ BACKUP ZIP  │◀─│ AUTO-BACKUP      │─▶│ BACKUP       │  │
//! │  │ codec       │  │ SCHEDULER        │  │ TARGET       │  │
//! │  └─────────────┘  └──────────────────┘  └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Photo and thumbnail payloads sealed independently with AES-256-GCM
//! - Key derived from the password with PBKDF2-HMAC-SHA256, never stored
//! - Names, albums and dimensions stay plaintext
//! - Backup archives hold plaintext images and can be restored without the
//!   password

pub mod advisor;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handles;
pub mod ingest;
pub mod sanitize;
pub mod scheduler;
pub mod store;
pub mod target;
pub mod vault;

pub use backup::{ExportSummary, ImportSummary};
pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use scheduler::{AutoBackupScheduler, BackupStatus};
pub use store::{Album, Photo};
pub use vault::PhotoVault;

/// pixvault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Progress sink that ignores every report
pub fn no_progress(_done: usize, _total: usize) {}
