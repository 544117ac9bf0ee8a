// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted agent state: device identity, room assignment, recorded
//! version, and the session token.
//!
//! The state document is written via a sibling temp file and an atomic
//! rename so a partial document is never observable, even across a crash
//! mid-write.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use cms_core::{DeviceIdentity, RoomAssignment, SessionToken};

use crate::layout::StorageLayout;
use crate::spool::ErrorSpool;
use crate::token::TokenStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token store error: {0}")]
    Token(String),
}

/// The on-disk shape of `agent_state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<DeviceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_config: Option<RoomAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

pub struct StateStore {
    layout: StorageLayout,
    state_path: PathBuf,
    tokens: TokenStore,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Open the store, loading any existing state document. A corrupt
    /// document is treated as absent (it will be rewritten whole).
    pub fn open(
        layout: StorageLayout,
        state_filename: &str,
        tokens: TokenStore,
    ) -> Result<StateStore, StoreError> {
        let state_path = layout.state_file(state_filename);
        let state = match std::fs::read_to_string(&state_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(path = %state_path.display(), %e, "state file unreadable, starting fresh");
                PersistedState::default()
            }),
            Err(_) => PersistedState::default(),
        };
        Ok(StateStore { layout, state_path, tokens, state: Mutex::new(state) })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn error_spool(&self) -> ErrorSpool {
        ErrorSpool::new(self.layout.error_reports_dir())
    }

    /// Return the persisted identity, deriving and persisting one when
    /// absent. `adapter` is the physical adapter id discovered by the
    /// platform layer, if any.
    pub fn ensure_device_identity(
        &self,
        adapter: Option<[u8; 6]>,
    ) -> Result<DeviceIdentity, StoreError> {
        if let Some(id) = self.device_identity() {
            return Ok(id);
        }
        let id = DeviceIdentity::derive(&DeviceIdentity::local_hostname(), adapter);
        info!(device_id = %id, "generated new device identity");
        self.mutate(|state| state.device_id = Some(id.clone()))?;
        Ok(id)
    }

    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        self.locked().device_id.clone()
    }

    pub fn room(&self) -> Option<RoomAssignment> {
        self.locked().room_config.clone()
    }

    pub fn put_room(&self, room: RoomAssignment) -> Result<(), StoreError> {
        self.mutate(|state| state.room_config = Some(room))
    }

    pub fn recorded_version(&self) -> Option<String> {
        self.locked().version.clone()
    }

    pub fn put_version(&self, version: &str) -> Result<(), StoreError> {
        self.mutate(|state| state.version = Some(version.to_string()))
    }

    pub fn put_token(
        &self,
        id: &DeviceIdentity,
        token: &SessionToken,
    ) -> Result<(), StoreError> {
        self.tokens.save(id, token).map_err(StoreError::Token)
    }

    pub fn load_token(&self, id: &DeviceIdentity) -> Option<SessionToken> {
        self.tokens.load(id)
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, PersistedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, apply: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let mut state = self.locked();
        let mut next = state.clone();
        apply(&mut next);
        write_atomic(&self.state_path, &next)?;
        *state = next;
        Ok(())
    }
}

/// Temp-file-plus-atomic-rename write in the target directory.
fn write_atomic(path: &std::path::Path, state: &PersistedState) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "state path has no parent"))
    })?;
    let body = serde_json::to_vec_pretty(state)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
#[path = "state_store_tests.rs"]
mod tests;
