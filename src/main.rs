//! pixvault - CLI
//!
//! Command-line interface for vault operations.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use pixvault::{PhotoVault, VaultError};

#[derive(Parser)]
#[command(name = "pixvault")]
#[command(author = "Karen Tonoyan")]
#[command(version = pixvault::VERSION)]
#[command(about = "pixvault - local photo store with encryption at rest and portable backups")]
struct Cli {
    /// Vault path
    #[arg(short, long, default_value = "./vault")]
    vault: PathBuf,

    /// Password of an encrypted vault
    #[arg(short, long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Create,

    /// Add an image file
    Add {
        /// Image path
        file: PathBuf,

        /// Album ID to add the photo to
        #[arg(long)]
        album: Option<String>,
    },

    /// List albums and photos
    List,

    /// Create an album
    AlbumCreate {
        name: String,

        #[arg(long, default_value = "📁")]
        icon: String,
    },

    /// Delete an album (its photos are kept)
    AlbumDelete {
        /// Album ID
        id: String,
    },

    /// Delete a photo
    Delete {
        /// Photo ID
        id: String,
    },

    /// Enable encryption, or finish an interrupted migration
    Encrypt,

    /// Check the password without changing anything
    UnlockCheck,

    /// Decrypt everything and disable encryption
    Decrypt,

    /// Export a backup archive
    Export {
        /// Output zip path
        output: PathBuf,
    },

    /// Import a backup archive
    Import {
        /// Backup zip path
        archive: PathBuf,
    },

    /// Manage the automatic backup location
    BackupDir {
        #[command(subcommand)]
        action: BackupDirAction,
    },

    /// Write a backup to the configured location now
    BackupNow,

    /// Show vault status
    Status,
}

#[derive(Subcommand)]
enum BackupDirAction {
    /// Grant a directory for automatic backups
    Set { path: PathBuf },
    /// Forget the backup directory
    Clear,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Open the vault and unlock it when it is encrypted and a password was given
fn open_vault(cli: &Cli) -> anyhow::Result<PhotoVault> {
    let vault = PhotoVault::open(&cli.vault)?;

    if vault.is_encryption_enabled()? {
        if let Some(password) = &cli.password {
            vault.unlock(password)?;
        }
    }

    Ok(vault)
}

fn require_password(cli: &Cli) -> anyhow::Result<&str> {
    match &cli.password {
        Some(password) if !password.is_empty() => Ok(password.as_str()),
        _ => bail!("this command needs --password"),
    }
}

fn progress(label: &'static str) -> impl FnMut(usize, usize) {
    move |done, total| {
        print!("\r{} {}/{}", label, done, total);
        let _ = std::io::stdout().flush();
        if done == total {
            println!();
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Create => {
            PhotoVault::create(&cli.vault)?;
            println!("✅ Vault created at: {}", cli.vault.display());
        }

        Commands::Add { file, album } => {
            let vault = open_vault(&cli)?;
            let photo = vault
                .import_file(file)
                .with_context(|| format!("adding {}", file.display()))?;

            if let Some(album_id) = album {
                vault.add_to_album(&photo.id, album_id)?;
            }
            println!("✅ Added {} ({}x{}) as {}", photo.name, photo.width, photo.height, photo.id);
        }

        Commands::List => {
            let vault = open_vault(&cli)?;

            let albums = vault.albums()?;
            if !albums.is_empty() {
                println!("Albums ({}):", albums.len());
                for album in &albums {
                    println!("  {} {} - {}", album.icon, album.id, album.name);
                }
                println!();
            }

            let photos = vault.photos()?;
            if photos.is_empty() {
                println!("📭 No photos in vault");
            } else {
                println!("📷 Photos in vault ({}):", photos.len());
                println!("{:-<60}", "");
                for photo in photos {
                    println!(
                        "{} - {} {}x{} ({} bytes, {} albums) {}",
                        photo.id,
                        photo.name,
                        photo.width,
                        photo.height,
                        photo.primary_payload.len(),
                        photo.album_ids.len(),
                        photo.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::AlbumCreate { name, icon } => {
            let vault = open_vault(&cli)?;
            let album = vault.create_album(name, icon)?;
            println!("✅ Album created with ID: {}", album.id);
        }

        Commands::AlbumDelete { id } => {
            let vault = open_vault(&cli)?;
            if !vault.delete_album(id)? {
                bail!(VaultError::AlbumNotFound(id.clone()));
            }
            println!("✅ Album deleted");
        }

        Commands::Delete { id } => {
            let vault = open_vault(&cli)?;
            if !vault.delete_photo(id)? {
                bail!(VaultError::PhotoNotFound(id.clone()));
            }
            println!("✅ Photo deleted");
        }

        Commands::Encrypt => {
            let password = require_password(&cli)?;
            let vault = PhotoVault::open(&cli.vault)?;

            let migrated = if vault.is_encryption_enabled()? {
                vault.unlock(password)?;
                vault.encrypt_pending(progress("Encrypting"))?
            } else {
                vault.enable_encryption(password, progress("Encrypting"))?
            };
            println!("🔐 Encryption enabled ({} photos encrypted)", migrated);
        }

        Commands::UnlockCheck => {
            let password = require_password(&cli)?;
            let vault = PhotoVault::open(&cli.vault)?;
            match vault.unlock(password) {
                Ok(()) => println!("✅ Password accepted"),
                Err(e) if e.is_retryable() => bail!("password rejected, try again"),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Decrypt => {
            let password = require_password(&cli)?;
            let vault = PhotoVault::open(&cli.vault)?;
            vault.unlock(password)?;

            let migrated = vault.disable_encryption(progress("Decrypting"))?;
            println!("🔓 Encryption disabled ({} photos decrypted)", migrated);
        }

        Commands::Export { output } => {
            let vault = open_vault(&cli)?;
            let file = File::create(output)
                .with_context(|| format!("creating {}", output.display()))?;

            let summary = vault.export_backup(file, progress("Exporting"))?;
            println!(
                "✅ Exported {} photos and {} albums to {}",
                summary.photos_exported,
                summary.albums_exported,
                output.display()
            );
            println!("⚠️  Backup archives are not encrypted. Store them somewhere safe.");
        }

        Commands::Import { archive } => {
            let vault = open_vault(&cli)?;
            let file = File::open(archive)
                .with_context(|| format!("opening {}", archive.display()))?;

            let summary = vault.import_backup(file, progress("Importing"))?;
            println!(
                "✅ Imported {} photos and {} albums ({} skipped, {} already present)",
                summary.photos_imported,
                summary.albums_imported,
                summary.photos_skipped,
                summary.photos_already_present
            );
        }

        Commands::BackupDir { action } => {
            let vault = PhotoVault::open(&cli.vault)?;
            match action {
                BackupDirAction::Set { path } => {
                    vault.set_backup_location(path)?;
                    println!("✅ Automatic backups go to {}", path.display());
                }
                BackupDirAction::Clear => {
                    vault.clear_backup_location()?;
                    println!("✅ Backup location cleared");
                }
            }
        }

        Commands::BackupNow => {
            let vault = open_vault(&cli)?;
            let report = vault.scheduler(None).run_now()?;
            println!("✅ Backup of {} photos written to {}", report.photos, report.path.display());
        }

        Commands::Status => {
            let vault = open_vault(&cli)?;
            let config = vault.config();
            let usage = vault.usage()?;

            println!("📊 {} (pixvault {})", config.name, config.version);
            println!("{:-<40}", "");
            println!("Path:             {}", vault.root().display());
            println!(
                "Encryption:       {}",
                match (vault.is_encryption_enabled()?, vault.is_unlocked()) {
                    (false, _) => "off",
                    (true, true) => "on (unlocked)",
                    (true, false) => "on (locked)",
                }
            );
            println!("Photos:           {} ({} encrypted)", usage.photos, usage.encrypted_photos);
            println!("Stored size:      {:.1} MB", usage.payload_bytes as f64 / 1024.0 / 1024.0);
            println!(
                "Backup location:  {}",
                vault
                    .backup_location()
                    .map(|h| h.location.display().to_string())
                    .unwrap_or_else(|| "not set".into())
            );
            println!(
                "Last backup:      {}",
                vault
                    .last_backup()?
                    .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".into())
            );
            println!(
                "Durable storage:  {}",
                if vault.request_durable_storage() { "yes" } else { "no (temp or cache directory)" }
            );
            if vault.backup_reminder_due()? {
                println!("⚠️  No backup in the last {} days", config.reminder_days);
            }
        }
    }

    Ok(())
}
