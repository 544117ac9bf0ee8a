// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stable per-host device identity.
//!
//! Derived once from the hostname plus a physical adapter identifier and
//! persisted forever. An adapter that is all-zero, locally administered,
//! or unavailable is not stable enough to identify a host, so a random
//! component is used instead.

use serde::{Deserialize, Serialize};

/// Stable host identifier, independent of server state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity(pub String);

impl DeviceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive an identity from the hostname and an optional adapter MAC.
    ///
    /// Unusable adapters fall back to `ANM-<hostname>-<uuid4>`.
    pub fn derive(hostname: &str, adapter: Option<[u8; 6]>) -> Self {
        match adapter.filter(|mac| mac_is_usable(*mac)) {
            Some(mac) => DeviceIdentity(format!("ANM-{}-{}", hostname, format_mac(mac))),
            None => DeviceIdentity(format!("ANM-{}-{}", hostname, uuid::Uuid::new_v4())),
        }
    }

    /// Current hostname, used as the stable component of new identities.
    pub fn local_hostname() -> String {
        gethostname::gethostname().to_string_lossy().into_owned()
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An adapter id is usable when it is non-zero and globally administered.
fn mac_is_usable(mac: [u8; 6]) -> bool {
    if mac.iter().all(|b| *b == 0) {
        return false;
    }
    // Locally-administered bit: set by virtualization layers and bridges,
    // not stable across reinstalls.
    mac[0] & 0x02 == 0
}

fn format_mac(mac: [u8; 6]) -> String {
    mac.map(|b| format!("{b:02X}")).join(":")
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
