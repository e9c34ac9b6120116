//! # zbackup
//!
//! Incremental, encrypted, file-level backup of a directory tree.
//!
//! ## Features
//!
//! - **Incremental**: only files modified after their last archive are re-archived
//! - **Per-file archives**: `src/a/b.txt` is stored as `dest/a/b.txt.zip`
//! - **Encryption**: AES-256 (default) or legacy ZipCrypto zip entry encryption
//! - **Password vault**: explicit, plaintext file, or machine-bound obfuscated file
//! - **Parallel Processing**: fixed pool of archive workers (5 by default)
//!
//! ## Quick Start
//!
//! ```no_run
//! use zbackup::backup::backup_config::BackupSettings;
//! use zbackup::backup::progress::TracingReporter;
//! use zbackup::backup::run::run_backup;
//! use zbackup::backup::vault::PasswordVault;
//!
//! let settings = BackupSettings::builder()
//!     .source("/home/me/documents")
//!     .destination("/mnt/backup/documents")
//!     .password_file("backup.pwd")
//!     .obfuscate(true)
//!     .build();
//! let vault = PasswordVault::for_host(std::env::current_dir()?);
//! let report = run_backup(&settings, &vault, &TracingReporter)?;
//! println!("{} archived, {} failed", report.archived(), report.failures().len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
