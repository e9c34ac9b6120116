use crate::backup::archive::archive_file;
use crate::backup::backup_config::{BackupConfig, BackupSettings};
use crate::backup::detect::{detect_changes, RunTotals};
use crate::backup::executor::BoundedExecutor;
use crate::backup::progress::{ArchiveFailure, ProgressTracker, Reporter, TaskOutcome};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::vault::machine::MachineIdentity;
use crate::backup::vault::PasswordVault;
use getset::Getters;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use validator::Validate;

/// Outcome of a run that was not aborted by a fatal error.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct RunReport {
    totals: RunTotals,
    /// Files archived successfully
    archived: usize,
    failures: Vec<ArchiveFailure>,
    elapsed: Duration,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Validates `settings` and resolves the password exactly once.
pub fn resolve_config<M: MachineIdentity>(
    settings: &BackupSettings,
    vault: &PasswordVault<M>,
) -> Result<BackupConfig> {
    settings
        .validate()
        .map_err(Error::from)
        .with_msg("Invalid backup configuration")?;

    let (Some(source), Some(destination)) = (settings.source(), settings.destination()) else {
        return Err(Error::Configuration(
            "A source and a destination directory must be provided".into(),
        ));
    };

    let password = vault.resolve_password(
        settings.password().as_ref(),
        settings.password_file().as_deref(),
        settings.obfuscate(),
    )?;
    info!("Password source: {}", password.provenance());

    let config = BackupConfig::new(
        source,
        destination,
        settings.algorithm(),
        password,
        settings.concurrency()?,
    );
    if !config.encrypts() {
        info!("Archives will not be encrypted");
    } else if config.algorithm().is_weak() {
        warn!("ZIP encryption is weak, prefer AES256");
    }
    Ok(config)
}

pub fn run_backup<M: MachineIdentity>(
    settings: &BackupSettings,
    vault: &PasswordVault<M>,
    reporter: &dyn Reporter,
) -> Result<RunReport> {
    let config = resolve_config(settings, vault)?;
    execute(&config, reporter)
}

/// Detects changes and archives them with bounded concurrency.
///
/// Returns `Err` only for fatal errors; per-file failures are collected in
/// [`RunReport::failures`].
pub fn execute(config: &BackupConfig, reporter: &dyn Reporter) -> Result<RunReport> {
    let started = Instant::now();

    info!("Checking for changes...");
    let (changes, totals) = detect_changes(config.source_root(), config.dest_root())
        .with_msg("Change detection failed")?;
    reporter.detection_summary(&totals, started.elapsed());

    if changes.is_empty() {
        return Ok(RunReport {
            totals,
            archived: 0,
            failures: Vec::new(),
            elapsed: started.elapsed(),
        });
    }

    info!("Backing up files...");
    let executor = BoundedExecutor::new(config.concurrency())?;
    let tracker = ProgressTracker::new(reporter, totals, started);
    let (tx, rx) = channel();
    let algorithm = config.algorithm();
    let password = config.password().secret();

    let (totals, failures) = std::thread::scope(|s| {
        let aggregator = s.spawn(move || tracker.consume(rx));

        executor.run(changes, |record| {
            let result = archive_file(
                algorithm,
                record.source_path(),
                record.destination_base(),
                password,
            );
            if let Err(e) = tx.send(TaskOutcome::new(record, result)) {
                warn!("{}", Error::from(e));
            }
        });
        drop(tx);

        aggregator.join()
    })
    .unwrap_or_else(|e| std::panic::resume_unwind(e));

    let report = RunReport {
        archived: totals.done_count - failures.len(),
        totals,
        failures,
        elapsed: started.elapsed(),
    };
    reporter.completed(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{archive_path, EncryptionAlgorithm};
    use crate::backup::detect::tests::{set_mtime, write_with_mtime};
    use crate::backup::progress::tests::RecordingReporter;
    use crate::backup::redacted::RedactedString;
    use crate::backup::vault::machine::StaticMachineIdentity;
    use crate::backup::vault::{PasswordMaterial, PasswordProvenance};
    use std::fs::File;
    use std::io::Read;
    use std::num::NonZeroUsize;
    use std::path::Path;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + secs)
    }

    fn config(src: &Path, dst: &Path, password: &str, concurrency: usize) -> BackupConfig {
        BackupConfig::new(
            src,
            dst,
            EncryptionAlgorithm::Aes256,
            PasswordMaterial::new(password, PasswordProvenance::Explicit),
            NonZeroUsize::new(concurrency).unwrap(),
        )
    }

    fn read_entry(archive: &Path, name: &str, password: &[u8]) -> Vec<u8> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut entry = zip.by_name_decrypt(name, password).unwrap();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).unwrap();
        buf
    }

    fn populate(src: &Path) {
        write_with_mtime(src.join("a.txt"), b"alpha", t(1));
        write_with_mtime(src.join("docs/b.txt"), b"bravo", t(1));
        write_with_mtime(src.join("docs/deep/c.bin"), &[7u8; 4096], t(1));
        write_with_mtime(src.join("other/b.txt"), b"bravo two", t(1));
    }

    #[test]
    fn test_full_run_archives_everything() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let reporter = RecordingReporter::default();

        let report = execute(&config(src.path(), dst.path(), "pw", 5), &reporter).unwrap();

        assert!(report.is_clean());
        assert_eq!(*report.archived(), 4);
        assert_eq!(report.totals().done_count, 4);
        assert_eq!(report.totals().done_bytes, report.totals().changed_bytes);
        assert_eq!(reporter.progress.lock().unwrap().len(), 4);
        assert_eq!(*reporter.completed.lock().unwrap(), vec![4]);

        assert_eq!(
            read_entry(&dst.path().join("docs/b.txt.zip"), "b.txt", b"pw"),
            b"bravo"
        );
        assert_eq!(
            read_entry(&dst.path().join("other/b.txt.zip"), "b.txt", b"pw"),
            b"bravo two"
        );
        assert_eq!(
            read_entry(&dst.path().join("docs/deep/c.bin.zip"), "c.bin", b"pw"),
            vec![7u8; 4096]
        );
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let config = config(src.path(), dst.path(), "pw", 5);
        execute(&config, &RecordingReporter::default()).unwrap();

        let reporter = RecordingReporter::default();
        let report = execute(&config, &reporter).unwrap();

        assert_eq!(report.totals().changed_count, 0);
        assert_eq!(report.totals().files_scanned, 4);
        assert_eq!(*report.archived(), 0);
        assert_eq!(reporter.summaries.lock().unwrap().len(), 1);
        assert!(reporter.progress.lock().unwrap().is_empty());
        assert!(reporter.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_up_to_date_destination_writes_nothing() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_with_mtime(src.path().join("a.txt"), b"alpha", t(5));
        write_with_mtime(dst.path().join("a.txt.zip"), b"not a zip", t(5));

        let report = execute(
            &config(src.path(), dst.path(), "", 5),
            &RecordingReporter::default(),
        )
        .unwrap();

        assert_eq!(*report.archived(), 0);
        assert_eq!(
            std::fs::read(dst.path().join("a.txt.zip")).unwrap(),
            b"not a zip"
        );
    }

    #[test]
    fn test_only_touched_file_is_rearchived() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let config = config(src.path(), dst.path(), "pw", 2);
        execute(&config, &RecordingReporter::default()).unwrap();

        std::fs::write(src.path().join("a.txt"), b"alpha v2").unwrap();
        set_mtime(src.path().join("a.txt"), SystemTime::now() + Duration::from_secs(60));

        let reporter = RecordingReporter::default();
        let report = execute(&config, &reporter).unwrap();
        assert_eq!(*report.archived(), 1);
        assert_eq!(
            reporter.progress.lock().unwrap()[0].relative_path(),
            Path::new("a.txt")
        );
        assert_eq!(
            read_entry(&archive_path(dst.path().join("a.txt")), "a.txt", b"pw"),
            b"alpha v2"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let locked = src.path().join("a.txt");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&locked).is_ok() {
            // running as root
            return;
        }

        let report = execute(
            &config(src.path(), dst.path(), "pw", 3),
            &RecordingReporter::default(),
        )
        .unwrap();

        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].relative_path(), Path::new("a.txt"));
        assert_eq!(*report.archived(), 3);
        assert!(!dst.path().join("a.txt.zip").exists());
    }

    #[test]
    fn test_resolve_config_uses_vault_once_and_normalizes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("pw.txt"), "filepw").unwrap();
        let vault = PasswordVault::new(StaticMachineIdentity("host".into()), work.path());
        let settings = BackupSettings::builder()
            .source(src.path())
            .destination(dst.path().join("new"))
            .password_file("pw.txt")
            .obfuscate(true)
            .concurrency(3)
            .build();

        let config = resolve_config(&settings, &vault).unwrap();
        assert_eq!(config.password().secret().as_str(), "filepw");
        assert_eq!(
            config.password().provenance(),
            PasswordProvenance::NewlyObfuscatedFile
        );
        assert_eq!(config.concurrency().get(), 3);
        assert_eq!(config.algorithm(), EncryptionAlgorithm::Aes256);
        assert!(dst.path().join("new").is_dir());
        assert_ne!(
            std::fs::read(work.path().join("pw.txt")).unwrap(),
            b"filepw"
        );
    }

    #[test]
    fn test_missing_source_is_configuration_error() {
        let work = TempDir::new().unwrap();
        let vault = PasswordVault::new(StaticMachineIdentity("host".into()), work.path());
        let settings = BackupSettings::builder()
            .destination(work.path().join("dst"))
            .build();

        let err = run_backup(&settings, &vault, &RecordingReporter::default()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Invalid backup configuration"));
    }

    #[test]
    fn test_vault_failure_stops_before_archiving() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        let work = TempDir::new().unwrap();
        let vault = PasswordVault::new(StaticMachineIdentity("host".into()), work.path());
        let settings = BackupSettings::builder()
            .source(src.path())
            .destination(dst.path())
            .password_file("missing.txt")
            .build();

        let reporter = RecordingReporter::default();
        let err = run_backup(&settings, &vault, &reporter).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Unable to read password file"));
        assert_eq!(std::fs::read_dir(dst.path()).unwrap().count(), 0);
        assert!(reporter.summaries.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_a_per_file_failure() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());
        std::os::unix::fs::symlink("/nonexistent/target", src.path().join("stale-link")).unwrap();

        let report = execute(
            &config(src.path(), dst.path(), "pw", 5),
            &RecordingReporter::default(),
        )
        .unwrap();

        assert_eq!(report.totals().files_scanned, 5);
        assert_eq!(*report.archived(), 4);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].relative_path(), Path::new("stale-link"));
        assert!(!dst.path().join("stale-link.zip").exists());
        assert!(dst.path().join("a.txt.zip").exists());
    }

    #[test]
    fn test_explicit_password_end_to_end() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_with_mtime(src.path().join("x.txt"), b"xray", t(1));
        let vault = PasswordVault::new(StaticMachineIdentity("host".into()), src.path());
        let settings = BackupSettings::builder()
            .source(src.path())
            .destination(dst.path())
            .password(RedactedString::new("explicit"))
            .algorithm(EncryptionAlgorithm::ZipStandard)
            .build();

        let report = run_backup(&settings, &vault, &RecordingReporter::default()).unwrap();
        assert_eq!(*report.archived(), 1);
        assert_eq!(
            read_entry(&dst.path().join("x.txt.zip"), "x.txt", b"explicit"),
            b"xray"
        );
    }
}
