// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token persistence.
//!
//! The OS credential store is preferred; when it is unavailable or fails,
//! tokens fall back to an owner-only file under the storage root. A token
//! found in the fallback file is migrated into the credential store
//! opportunistically on load.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use cms_core::{DeviceIdentity, SessionToken};

/// Keyring service name the tokens are filed under.
const TOKEN_SERVICE_NAME: &str = "ComputerManagementSystemAgent";

/// Seam over the OS credential store so tests can substitute a fake.
pub trait CredentialStore: Send + Sync {
    fn store(&self, account: &str, secret: &str) -> Result<(), String>;
    fn retrieve(&self, account: &str) -> Result<Option<String>, String>;
}

/// OS-backed credential store.
pub struct KeyringStore;

impl CredentialStore for KeyringStore {
    fn store(&self, account: &str, secret: &str) -> Result<(), String> {
        keyring::Entry::new(TOKEN_SERVICE_NAME, account)
            .and_then(|entry| entry.set_password(secret))
            .map_err(|e| e.to_string())
    }

    fn retrieve(&self, account: &str) -> Result<Option<String>, String> {
        match keyring::Entry::new(TOKEN_SERVICE_NAME, account)
            .and_then(|entry| entry.get_password())
        {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub struct TokenStore {
    credentials: Option<Arc<dyn CredentialStore>>,
    fallback_path: PathBuf,
}

impl TokenStore {
    pub fn new(credentials: Option<Arc<dyn CredentialStore>>, fallback_path: PathBuf) -> Self {
        TokenStore { credentials, fallback_path }
    }

    /// Save the token: credential store first, file fallback on failure.
    /// A credential-store success removes any previously file-stored copy.
    pub fn save(&self, id: &DeviceIdentity, token: &SessionToken) -> Result<(), String> {
        if token.as_str().is_empty() {
            return Err("cannot save an empty token".to_string());
        }

        if let Some(credentials) = &self.credentials {
            match credentials.store(id.as_str(), token.as_str()) {
                Ok(()) => {
                    info!(device_id = %id, "token saved to credential store");
                    self.remove_from_file(id);
                    return Ok(());
                }
                Err(e) => {
                    warn!(device_id = %id, error = %e, "credential store save failed, using file fallback");
                }
            }
        }

        let mut entries = self.read_file();
        entries.insert(id.as_str().to_string(), token.as_str().to_string());
        self.write_file(&entries)?;
        info!(device_id = %id, path = %self.fallback_path.display(), "token saved to fallback file");
        Ok(())
    }

    /// Load the token: credential store first, then the fallback file
    /// (migrating a file hit back into the credential store).
    pub fn load(&self, id: &DeviceIdentity) -> Option<SessionToken> {
        if let Some(credentials) = &self.credentials {
            match credentials.retrieve(id.as_str()) {
                Ok(Some(secret)) => {
                    debug!(device_id = %id, "token loaded from credential store");
                    return Some(SessionToken(secret));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(device_id = %id, error = %e, "credential store load failed, checking file fallback");
                }
            }
        }

        let secret = self.read_file().remove(id.as_str()).filter(|s| !s.is_empty())?;
        let token = SessionToken(secret);
        if self.credentials.is_some() {
            info!(device_id = %id, "migrating token from file to credential store");
            if let Err(e) = self.save(id, &token) {
                warn!(device_id = %id, error = %e, "token migration failed");
            }
        }
        Some(token)
    }

    fn remove_from_file(&self, id: &DeviceIdentity) {
        let mut entries = self.read_file();
        if entries.remove(id.as_str()).is_some() {
            if let Err(e) = self.write_file(&entries) {
                warn!(error = %e, "failed to remove migrated token from fallback file");
            }
        }
    }

    fn read_file(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(&self.fallback_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write_file(&self, entries: &BTreeMap<String, String>) -> Result<(), String> {
        let body = serde_json::to_vec_pretty(entries).map_err(|e| e.to_string())?;
        std::fs::write(&self.fallback_path, body).map_err(|e| e.to_string())?;
        mark_secret_file(&self.fallback_path);
        Ok(())
    }
}

/// Keep the fallback file out of casual reach: owner-only read/write on
/// unix, the hidden attribute on windows.
#[cfg(unix)]
fn mark_secret_file(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), error = %e, "failed to restrict token file");
    }
}

#[cfg(windows)]
fn mark_secret_file(path: &std::path::Path) {
    use std::os::windows::process::CommandExt;
    // CREATE_NO_WINDOW: the agent is a background service
    let status = std::process::Command::new("attrib")
        .arg("+H")
        .arg(path)
        .creation_flags(0x08000000)
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            warn!(path = %path.display(), %status, "failed to hide token file");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to hide token file"),
    }
}

#[cfg(not(any(unix, windows)))]
fn mark_secret_file(_path: &std::path::Path) {}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
