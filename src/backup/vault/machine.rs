//! Machine identity used to bind the obfuscation key to one host.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Source of a stable, host-specific identifier.
pub trait MachineIdentity: Send + Sync {
    /// Raw machine identifier (e.g. the contents of `/etc/machine-id`).
    fn machine_id(&self) -> Result<String>;

    /// Application-scoped identifier: hex encoded HMAC-SHA256 keyed by the raw
    /// machine id over `app_id`, so the raw id never leaves the host.
    fn protected_id(&self, app_id: &[u8]) -> Result<String> {
        let id = self.machine_id()?;
        protect(id.as_bytes(), app_id)
    }
}

pub(crate) fn protect(machine_id: &[u8], app_id: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(machine_id)
        .map_err(|e| Error::MachineIdentity(e.to_string()))?;
    mac.update(app_id);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Reads the operating system's machine id.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostMachineIdentity;

impl MachineIdentity for HostMachineIdentity {
    fn machine_id(&self) -> Result<String> {
        machine_uid::get()
            .map(|id| id.trim().to_string())
            .map_err(|e| Error::MachineIdentity(e.to_string()))
    }
}

/// A fixed identity, for hosts without a usable machine id and for tests.
#[derive(Clone, Debug)]
pub struct StaticMachineIdentity(pub String);

impl MachineIdentity for StaticMachineIdentity {
    fn machine_id(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
