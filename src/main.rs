use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, warn};
use zbackup::backup::archive::EncryptionAlgorithm;
use zbackup::backup::backup_config::BackupSettings;
use zbackup::backup::progress::TracingReporter;
use zbackup::backup::redacted::RedactedString;
use zbackup::backup::result_error::error::Error;
use zbackup::backup::result_error::result::Result;
use zbackup::backup::run::{run_backup, RunReport};
use zbackup::backup::vault::PasswordVault;
use zeroize::Zeroizing;

/// Incremental, encrypted, per-file zip backup
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive every file changed since the last backup
    Backup(BackupArgs),
}

#[derive(clap::Args, Debug)]
struct BackupArgs {
    /// Directory to back up
    source: Option<PathBuf>,
    /// Directory receiving the archives
    destination: Option<PathBuf>,
    /// Encryption algorithm [default: AES256]. ZIP is weak, for old unzip tools only
    #[arg(long, value_enum, ignore_case = true)]
    alg: Option<EncryptionAlgorithm>,
    /// Password used to encrypt the archives
    #[arg(long)]
    pwd: Option<String>,
    /// File holding the password, relative to the working directory
    #[arg(long)]
    pwd_file: Option<PathBuf>,
    /// Keep the password file encrypted with a key bound to this machine
    #[arg(long)]
    obfuscate: bool,
    /// Ask for the password on standard input
    #[arg(long, conflicts_with = "pwd")]
    prompt: bool,
    /// Number of files archived in parallel [default: 5]
    #[arg(long)]
    concurrency: Option<usize>,
    /// YAML file with default settings; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl BackupArgs {
    fn into_settings(self) -> Result<BackupSettings> {
        let base = match &self.config {
            Some(path) => BackupSettings::from_yaml_file(path)?,
            None => BackupSettings::default(),
        };

        let password = match (self.pwd, self.prompt) {
            (Some(pwd), _) => Some(RedactedString::new(pwd)),
            (None, true) => Some(prompt_password()?),
            (None, false) => None,
        };

        let overrides = BackupSettings::builder()
            .maybe_source(self.source)
            .maybe_destination(self.destination)
            .maybe_algorithm(self.alg)
            .maybe_password(password)
            .maybe_password_file(self.pwd_file)
            .maybe_obfuscate(self.obfuscate.then_some(true))
            .maybe_concurrency(self.concurrency)
            .build();

        Ok(base.overlay(overrides))
    }
}

fn prompt_password() -> Result<RedactedString> {
    let password = Zeroizing::new(rpassword::prompt_password("Enter password: ")?);
    check_prompted(&password)
}

fn check_prompted(password: &str) -> Result<RedactedString> {
    if password.is_empty() {
        return Err(Error::Configuration("A password must be provided".into()));
    }
    Ok(RedactedString::new(password))
}

fn backup(args: BackupArgs) -> Result<RunReport> {
    let working_dir = std::env::current_dir()?;
    let settings = args.into_settings()?;
    let vault = PasswordVault::for_host(working_dir);
    run_backup(&settings, &vault, &TracingReporter)
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = match args.command {
        Command::Backup(backup_args) => backup(backup_args),
    };

    match res {
        Ok(report) => {
            if !report.is_clean() {
                warn!(
                    "{} of {} files were not backed up",
                    report.failures().len(),
                    report.totals().changed_count
                );
            }
        }
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
