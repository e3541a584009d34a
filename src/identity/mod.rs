//! Device identity derivation.
//!
//! The identifier is derived once at boot from a hardware-unique seed and
//! is read-only for the rest of the device's lifetime. Every uploaded
//! reading and every responder notification carries it.

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Hex characters of the digest kept in the identifier
const ID_HEX_LEN: usize = 12;

/// Immutable device identifier, e.g. `vigil-9f3a07b1c42d`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
}

impl DeviceIdentity {
    /// Derive the identity from a hardware-unique seed.
    /// The same seed always yields the same identifier.
    pub fn from_seed(seed: &[u8]) -> Self {
        let hash = Sha256::digest(seed);
        let hex = hex::encode(hash);
        Self {
            id: format!("vigil-{}", &hex[..ID_HEX_LEN]),
        }
    }

    /// Derive the identity from the best hardware-unique source the host
    /// offers. Falls back to a random one-shot seed when none is readable,
    /// in which case the identifier does not survive a restart.
    pub fn from_host() -> Self {
        match std::fs::read_to_string("/etc/machine-id") {
            Ok(machine_id) if !machine_id.trim().is_empty() => {
                Self::from_seed(machine_id.trim().as_bytes())
            }
            _ => {
                warn!("No stable hardware id source, using a one-shot random identity");
                let mut seed = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut seed);
                Self::from_seed(&seed)
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
