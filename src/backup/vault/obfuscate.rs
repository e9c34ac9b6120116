//! Machine-bound obfuscation of the password file.
//!
//! # Threat model
//!
//! This is casual obfuscation, not secret management. The key is the MD5 of a
//! passphrase compiled into the binary concatenated with an HMAC of the host's
//! machine id. MD5 is not a password KDF and the machine id has little entropy,
//! so anyone able to run code on the machine can recover the password. What it
//! does stop is the password file being readable when copied elsewhere or
//! glanced at on disk. Changing the derivation would orphan every file already
//! obfuscated, so it is frozen.
//!
//! Sealed format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! AES-128-GCM, no associated data.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::vault::machine::MachineIdentity;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use md5::{Digest, Md5};
use rand::RngCore;
use std::fmt::{Debug, Formatter};
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// Embedded passphrase. Changing it invalidates every obfuscated file.
const EMBEDDED_PASSPHRASE: [u8; 30] = [
    76, 142, 161, 244, 62, 182, 42, 55, 163, 126, 112, 115, 63, 13, 105, 11, 183, 145, 163, 204,
    19, 76, 160, 189, 0, 112, 180, 1, 175, 125,
];

/// Slice of the passphrase used as the application id for the machine id HMAC
const APP_ID_RANGE: std::ops::Range<usize> = 4..14;

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 16;

/// Symmetric key for the password file, derived once per obfuscator.
pub struct ObfuscationKey(Zeroizing<[u8; KEY_LEN]>);

impl ObfuscationKey {
    /// `MD5(passphrase || protected_machine_id)`
    pub fn derive<M: MachineIdentity + ?Sized>(identity: &M) -> Result<Self> {
        let machine_id = identity.protected_id(&EMBEDDED_PASSPHRASE[APP_ID_RANGE])?;
        let mut hasher = Md5::new();
        hasher.update(EMBEDDED_PASSPHRASE);
        hasher.update(machine_id.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&hasher.finalize());
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes128Gcm> {
        Aes128Gcm::new_from_slice(&self.0[..]).map_err(|e| Error::Vault(e.to_string()))
    }
}

impl Debug for ObfuscationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObfuscationKey(..)")
    }
}

/// What a password file turned out to contain.
#[derive(Debug, PartialEq, Eq)]
pub enum FileState {
    /// Sealed under this machine's key; holds the recovered plaintext.
    Decrypted(Zeroizing<Vec<u8>>),
    /// Not (or not validly) sealed; holds the raw file bytes.
    NotYetObfuscated(Zeroizing<Vec<u8>>),
}

pub struct Obfuscator<M: MachineIdentity> {
    identity: M,
    key: OnceLock<ObfuscationKey>,
}

impl<M: MachineIdentity> Obfuscator<M> {
    pub fn new(identity: M) -> Self {
        Self {
            identity,
            key: OnceLock::new(),
        }
    }

    fn key(&self) -> Result<&ObfuscationKey> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key = ObfuscationKey::derive(&self.identity)?;
        tracing::debug!("Derived password file obfuscation key");
        Ok(self.key.get_or_init(|| key))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.key()?.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::Vault(format!("AES-GCM encrypt: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Fails with [`Error::Authentication`] when `data` is shorter than a nonce
    /// or the tag does not verify under this machine's key.
    pub fn open(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = self.key()?.cipher()?;
        if data.len() < NONCE_LEN {
            return Err(Error::Authentication);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Authentication)
    }

    /// Key derivation failures still propagate; only authentication failures
    /// become [`FileState::NotYetObfuscated`].
    pub fn classify(&self, raw: Vec<u8>) -> Result<FileState> {
        let raw = Zeroizing::new(raw);
        match self.open(&raw) {
            Ok(plaintext) => Ok(FileState::Decrypted(plaintext)),
            Err(Error::Authentication) => Ok(FileState::NotYetObfuscated(raw)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::vault::machine::StaticMachineIdentity;

    fn obfuscator(id: &str) -> Obfuscator<StaticMachineIdentity> {
        Obfuscator::new(StaticMachineIdentity(id.into()))
    }

    struct BrokenIdentity;

    impl MachineIdentity for BrokenIdentity {
        fn machine_id(&self) -> Result<String> {
            Err(Error::MachineIdentity("no machine id".into()))
        }
    }

    #[test]
    fn test_seal_layout() {
        let sealed = obfuscator("host-a").seal(b"password").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"password".len() + 16);
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let o = obfuscator("host-a");
        let a = o.seal(b"password").unwrap();
        let b = o.seal(b"password").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_open_round_trip() {
        let o = obfuscator("host-a");
        let sealed = o.seal(b"correct horse").unwrap();
        assert_eq!(o.open(&sealed).unwrap().as_slice(), b"correct horse");
    }

    #[test]
    fn test_open_other_machine_fails_authentication() {
        let sealed = obfuscator("host-a").seal(b"correct horse").unwrap();
        assert!(matches!(
            obfuscator("host-b").open(&sealed),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_open_short_input_fails_authentication() {
        assert!(matches!(
            obfuscator("host-a").open(b"short"),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_open_tampered_fails_authentication() {
        let o = obfuscator("host-a");
        let mut sealed = o.seal(b"correct horse").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(o.open(&sealed), Err(Error::Authentication)));
    }

    #[test]
    fn test_classify_states() {
        let o = obfuscator("host-a");
        let sealed = o.seal(b"pw").unwrap();
        assert_eq!(
            o.classify(sealed).unwrap(),
            FileState::Decrypted(Zeroizing::new(b"pw".to_vec()))
        );
        assert_eq!(
            o.classify(b"plain password".to_vec()).unwrap(),
            FileState::NotYetObfuscated(Zeroizing::new(b"plain password".to_vec()))
        );
    }

    #[test]
    fn test_classify_propagates_key_failure() {
        let o = Obfuscator::new(BrokenIdentity);
        assert!(matches!(
            o.classify(b"anything".to_vec()),
            Err(Error::MachineIdentity(_))
        ));
    }

    #[test]
    fn test_key_is_deterministic_per_machine() {
        let a1 = ObfuscationKey::derive(&StaticMachineIdentity("host-a".into())).unwrap();
        let a2 = ObfuscationKey::derive(&StaticMachineIdentity("host-a".into())).unwrap();
        let b = ObfuscationKey::derive(&StaticMachineIdentity("host-b".into())).unwrap();
        assert_eq!(*a1.0, *a2.0);
        assert_ne!(*a1.0, *b.0);
    }
}
