// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::*;
use cms_core::{DeviceIdentity, SessionToken};

/// In-memory credential store; `failing` simulates an unavailable keyring.
#[derive(Default)]
struct FakeCredentials {
    secrets: Mutex<HashMap<String, String>>,
    failing: bool,
}

impl CredentialStore for FakeCredentials {
    fn store(&self, account: &str, secret: &str) -> Result<(), String> {
        if self.failing {
            return Err("keyring unavailable".to_string());
        }
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn retrieve(&self, account: &str) -> Result<Option<String>, String> {
        if self.failing {
            return Err("keyring unavailable".to_string());
        }
        Ok(self.secrets.lock().unwrap_or_else(|e| e.into_inner()).get(account).cloned())
    }
}

fn device() -> DeviceIdentity {
    DeviceIdentity("ANM-testhost-00:11:22:33:44:55".to_string())
}

#[test]
fn round_trips_through_credential_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(
        Some(Arc::new(FakeCredentials::default())),
        dir.path().join("agent_token.json"),
    );

    store.save(&device(), &SessionToken("T1".into())).unwrap();
    assert_eq!(store.load(&device()), Some(SessionToken("T1".into())));
    // Nothing was written to the fallback file
    assert!(!dir.path().join("agent_token.json").exists());
}

#[test]
fn falls_back_to_file_when_credential_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let failing = Arc::new(FakeCredentials { failing: true, ..Default::default() });
    let path = dir.path().join("agent_token.json");
    let store = TokenStore::new(Some(failing), path.clone());

    store.save(&device(), &SessionToken("T2".into())).unwrap();
    assert!(path.exists(), "fallback file must exist");
    assert_eq!(store.load(&device()), Some(SessionToken("T2".into())));
}

#[test]
fn file_token_migrates_to_credential_store_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent_token.json");

    // Seed a file-only token (as left behind by a keyring-less run)
    let file_only = TokenStore::new(None, path.clone());
    file_only.save(&device(), &SessionToken("T3".into())).unwrap();

    let credentials = Arc::new(FakeCredentials::default());
    let store = TokenStore::new(Some(Arc::clone(&credentials) as Arc<dyn CredentialStore>), path);
    assert_eq!(store.load(&device()), Some(SessionToken("T3".into())));

    // Migrated: present in the credential store now
    assert_eq!(credentials.retrieve(device().as_str()).unwrap(), Some("T3".to_string()));
}

#[test]
fn missing_token_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(None, dir.path().join("agent_token.json"));
    assert_eq!(store.load(&device()), None);
}

#[test]
fn empty_token_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(None, dir.path().join("agent_token.json"));
    assert!(store.save(&device(), &SessionToken(String::new())).is_err());
}

#[cfg(unix)]
#[test]
fn fallback_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent_token.json");
    let store = TokenStore::new(None, path.clone());
    store.save(&device(), &SessionToken("T4".into())).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
