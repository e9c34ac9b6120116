use crate::backup::redacted::RedactedString;
use clap::ValueEnum;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Per-entry encryption applied inside each zip archive.
#[derive(
    Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum EncryptionAlgorithm {
    /// Write unencrypted entries even when a password is configured.
    #[serde(rename = "NONE", alias = "none")]
    #[value(name = "NONE")]
    #[display("NONE")]
    None,
    /// Legacy PKWARE "ZipCrypto". Weak: kept only so older unzip tools can
    /// open the archives. Do not rely on it for confidentiality.
    #[serde(rename = "ZIP", alias = "zip")]
    #[value(name = "ZIP")]
    #[display("ZIP")]
    ZipStandard,
    /// WinZip AE-2 with AES-256.
    #[default]
    #[serde(rename = "AES256", alias = "aes256")]
    #[value(name = "AES256")]
    #[display("AES256")]
    Aes256,
}

impl EncryptionAlgorithm {
    pub fn is_weak(&self) -> bool {
        matches!(self, EncryptionAlgorithm::ZipStandard)
    }

    /// Entries are encrypted only with a non-empty password and an algorithm other than `NONE`.
    pub fn encrypts_with(&self, password: &RedactedString) -> bool {
        !password.is_empty() && *self != EncryptionAlgorithm::None
    }
}
