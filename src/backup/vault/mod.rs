//! Password resolution for archive encryption.
//!
//! The password comes from, in order of precedence, an explicit value, a
//! plaintext file, or an obfuscated file (see [`obfuscate`]). An empty result
//! means archives are written without encryption.

pub mod machine;
pub mod obfuscate;

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::vault::machine::{HostMachineIdentity, MachineIdentity};
use crate::backup::vault::obfuscate::{FileState, Obfuscator};
use derive_more::Display;
use getset::{CopyGetters, Getters};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PasswordProvenance {
    #[display("none")]
    None,
    #[display("explicit value")]
    Explicit,
    #[display("plaintext file")]
    PlaintextFile,
    #[display("obfuscated file")]
    ObfuscatedFile,
    #[display("newly obfuscated file")]
    NewlyObfuscatedFile,
}

/// The resolved secret plus where it came from. Never persisted by the engine.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct PasswordMaterial {
    #[getset(get = "pub")]
    secret: RedactedString,
    #[getset(get_copy = "pub")]
    provenance: PasswordProvenance,
}

impl PasswordMaterial {
    pub fn new<S: Into<RedactedString>>(secret: S, provenance: PasswordProvenance) -> Self {
        Self {
            secret: secret.into(),
            provenance,
        }
    }

    pub fn none() -> Self {
        Self::new(RedactedString::default(), PasswordProvenance::None)
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

pub struct PasswordVault<M: MachineIdentity> {
    obfuscator: Obfuscator<M>,
    working_dir: PathBuf,
}

impl PasswordVault<HostMachineIdentity> {
    pub fn for_host<P: Into<PathBuf>>(working_dir: P) -> Self {
        Self::new(HostMachineIdentity, working_dir)
    }
}

impl<M: MachineIdentity> PasswordVault<M> {
    pub fn new<P: Into<PathBuf>>(identity: M, working_dir: P) -> Self {
        Self {
            obfuscator: Obfuscator::new(identity),
            working_dir: working_dir.into(),
        }
    }

    pub fn obfuscator(&self) -> &Obfuscator<M> {
        &self.obfuscator
    }

    /// Resolves the password without ever reading standard input.
    ///
    /// With `obfuscate`, a file that does not authenticate is taken as the
    /// plaintext password and rewritten sealed, so later runs decrypt it.
    pub fn resolve_password(
        &self,
        explicit: Option<&RedactedString>,
        file: Option<&Path>,
        obfuscate: bool,
    ) -> Result<PasswordMaterial> {
        if let Some(explicit) = explicit.filter(|p| !p.is_empty()) {
            tracing::debug!("Using explicit password");
            return Ok(PasswordMaterial::new(
                explicit.clone(),
                PasswordProvenance::Explicit,
            ));
        }

        let Some(file) = file.filter(|f| !f.as_os_str().is_empty()) else {
            tracing::debug!("No password configured, archives will not be encrypted");
            return Ok(PasswordMaterial::none());
        };

        let path = self.working_dir.join(file);
        let raw = std::fs::read(&path)
            .map_err(Error::from)
            .with_msg(format!("Unable to read password file {:?}", path))?;

        if !obfuscate {
            tracing::debug!("Using plaintext password file {:?}", path);
            return Ok(PasswordMaterial::new(
                decode(Zeroizing::new(raw))?,
                PasswordProvenance::PlaintextFile,
            ));
        }

        match self.obfuscator.classify(raw)? {
            FileState::Decrypted(plaintext) => {
                tracing::debug!("Decrypted obfuscated password file {:?}", path);
                Ok(PasswordMaterial::new(
                    decode(plaintext)?,
                    PasswordProvenance::ObfuscatedFile,
                ))
            }
            FileState::NotYetObfuscated(raw) => {
                let secret = decode(raw.clone())?;
                let sealed = self
                    .obfuscator
                    .seal(&raw)
                    .with_msg("Unable to encrypt password file")?;
                std::fs::write(&path, sealed)
                    .map_err(Error::from)
                    .with_msg(format!("Unable to save encrypted password file {:?}", path))?;
                tracing::info!("Obfuscated password file {:?}", path);
                Ok(PasswordMaterial::new(
                    secret,
                    PasswordProvenance::NewlyObfuscatedFile,
                ))
            }
        }
    }
}

fn decode(bytes: Zeroizing<Vec<u8>>) -> Result<RedactedString> {
    std::str::from_utf8(&bytes)
        .map(RedactedString::from)
        .map_err(|e| Error::Vault(format!("Password is not valid UTF-8: {e}")))
}
