use crate::backup::archive::EncryptionAlgorithm;
use crate::backup::executor::DEFAULT_CONCURRENCY;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_dir_exist, validate_dir_exist_or_created};
use crate::backup::vault::PasswordMaterial;
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ffi::OsString;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use validator::Validate;

/// Unresolved run inputs, as read from a YAML file and/or the command line.
///
/// ```yaml
/// source: /home/me/documents
/// destination: /mnt/backup/documents
/// algorithm: AES256
/// password_file: backup.pwd
/// obfuscate: true
/// concurrency: 5
/// ```
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
pub struct BackupSettings {
    #[validate(
        required(message = "A source directory must be provided"),
        custom(function = validate_dir_exist)
    )]
    #[builder(into)]
    #[getset(get = "pub")]
    source: Option<PathBuf>,
    #[validate(
        required(message = "A destination directory must be provided"),
        custom(function = validate_dir_exist_or_created)
    )]
    #[builder(into)]
    #[getset(get = "pub")]
    destination: Option<PathBuf>,
    algorithm: Option<EncryptionAlgorithm>,
    #[builder(into)]
    #[getset(get = "pub")]
    password: Option<RedactedString>,
    /// Relative paths resolve against the working directory
    #[builder(into)]
    #[getset(get = "pub")]
    password_file: Option<PathBuf>,
    obfuscate: Option<bool>,
    #[validate(range(min = 1, max = 64))]
    concurrency: Option<usize>,
}

impl BackupSettings {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, Self>(f).map_err(Error::from))
            .with_msg(format!("Parse YAML config failed: {:?}", path))
    }

    /// Field-wise merge where every value set in `overrides` wins.
    pub fn overlay(self, overrides: BackupSettings) -> BackupSettings {
        BackupSettings {
            source: overrides.source.or(self.source),
            destination: overrides.destination.or(self.destination),
            algorithm: overrides.algorithm.or(self.algorithm),
            password: overrides.password.or(self.password),
            password_file: overrides.password_file.or(self.password_file),
            obfuscate: overrides.obfuscate.or(self.obfuscate),
            concurrency: overrides.concurrency.or(self.concurrency),
        }
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm.unwrap_or_default()
    }

    pub fn obfuscate(&self) -> bool {
        self.obfuscate.unwrap_or(false)
    }

    pub fn concurrency(&self) -> Result<NonZeroUsize> {
        let n = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        NonZeroUsize::new(n)
            .ok_or_else(|| Error::Configuration(format!("Invalid concurrency {n}")))
    }
}

/// Appends the platform separator unless the path already ends in `/` or `\`.
pub fn with_trailing_separator<P: Into<PathBuf>>(path: P) -> PathBuf {
    let path = path.into();
    if path.as_os_str().to_string_lossy().ends_with(['/', '\\']) {
        return path;
    }
    let mut s = OsString::from(path);
    s.push(MAIN_SEPARATOR_STR);
    s.into()
}

/// Fully resolved, immutable configuration for one run.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct BackupConfig {
    #[getset(get = "pub")]
    source_root: PathBuf,
    #[getset(get = "pub")]
    dest_root: PathBuf,
    #[getset(get_copy = "pub")]
    algorithm: EncryptionAlgorithm,
    #[getset(get = "pub")]
    password: PasswordMaterial,
    #[getset(get_copy = "pub")]
    concurrency: NonZeroUsize,
}

impl BackupConfig {
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(
        source_root: P1,
        dest_root: P2,
        algorithm: EncryptionAlgorithm,
        password: PasswordMaterial,
        concurrency: NonZeroUsize,
    ) -> Self {
        Self {
            source_root: with_trailing_separator(source_root),
            dest_root: with_trailing_separator(dest_root),
            algorithm,
            password,
            concurrency,
        }
    }

    pub fn encrypts(&self) -> bool {
        self.algorithm.encrypts_with(self.password.secret())
    }
}
