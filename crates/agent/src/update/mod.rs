// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Staged self-update workflow.
//!
//! Download → verify → extract → resolve binaries → optional updater
//! self-replace → launch the external updater → coordinated shutdown.
//! Until the updater is launched, every failure cleans up the files this
//! run wrote and reports the failure; after launch, binary rollback is
//! the external updater's contract.

mod package;

pub use package::{extract_package, resolve_executable, sha256_file};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use cms_core::{AgentState, UpdateManifest, AGENT_VERSION};
use cms_net::RequestClient;
use cms_store::StateStore;

use crate::agent::AgentHandle;
use crate::connector::ServerConnector;

/// Free space required in the updates directory before downloading.
const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;
/// Updater self-replace retry schedule.
const REPLACE_RETRIES: u32 = 3;
const REPLACE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[cfg(windows)]
const AGENT_BIN: &str = "cms-agent.exe";
#[cfg(windows)]
const UPDATER_BIN: &str = "cms-updater.exe";
#[cfg(not(windows))]
const AGENT_BIN: &str = "cms-agent";
#[cfg(not(windows))]
const UPDATER_BIN: &str = "cms-updater";

/// One failure point in the workflow: what to report and what to remove.
struct UpdateFailure {
    error_type: &'static str,
    message: String,
    details: Option<Map<String, Value>>,
    cleanup: Vec<PathBuf>,
}

impl UpdateFailure {
    fn new(error_type: &'static str, message: impl Into<String>) -> Self {
        UpdateFailure { error_type, message: message.into(), details: None, cleanup: Vec::new() }
    }

    fn cleanup(mut self, paths: &[&Path]) -> Self {
        self.cleanup = paths.iter().map(|p| p.to_path_buf()).collect();
        self
    }

    fn details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }
}

pub struct UpdateEngine {
    store: Arc<StateStore>,
    http: Arc<RequestClient>,
    connector: Arc<ServerConnector>,
    handle: Arc<AgentHandle>,
    /// Non-blocking admission: concurrent triggers are dropped.
    run_lock: tokio::sync::Mutex<()>,
}

impl UpdateEngine {
    pub fn new(
        store: Arc<StateStore>,
        http: Arc<RequestClient>,
        connector: Arc<ServerConnector>,
        handle: Arc<AgentHandle>,
    ) -> Self {
        UpdateEngine { store, http, connector, handle, run_lock: tokio::sync::Mutex::new(()) }
    }

    /// Proactive path: ask the server for a manifest and start an update
    /// when a different version is offered. Used both at startup and as
    /// the response to a push nudge.
    pub async fn check_and_initiate(&self) {
        if self.handle.state() != AgentState::Idle {
            info!(state = %self.handle.state(), "skipping update check: agent not idle");
            return;
        }
        info!(current_version = AGENT_VERSION, "checking for updates");
        match self.http.check_update(AGENT_VERSION).await {
            Ok(Some(manifest)) if manifest.version != AGENT_VERSION => {
                info!(version = %manifest.version, "newer version available, initiating update");
                self.initiate(manifest).await;
            }
            Ok(Some(manifest)) => {
                info!(version = %manifest.version, "server version is not newer, no update");
            }
            Ok(None) => info!("no update available"),
            Err(e) => warn!(%e, "update check failed"),
        }
    }

    /// Run one update from a manifest. Concurrent calls are dropped.
    pub async fn initiate(&self, manifest: UpdateManifest) {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("update already in progress, ignoring trigger");
            return;
        };

        if !self.handle.set_state(AgentState::UpdatingStarting) {
            warn!("cannot start update from current state");
            return;
        }

        if let Err(failure) = self.run(&manifest).await {
            self.handle_failure(failure).await;
        }
    }

    async fn run(&self, manifest: &UpdateManifest) -> Result<(), UpdateFailure> {
        // 1. Prerequisites
        if !manifest.is_complete() {
            return Err(UpdateFailure::new(
                "UpdateStartFailed",
                "update manifest is missing version, download_url, or checksum_sha256",
            ));
        }
        let updates_dir = self.store.layout().updates_dir();
        std::fs::create_dir_all(&updates_dir).map_err(|e| {
            UpdateFailure::new(
                "UpdateResourceCheckFailed",
                format!("failed to create update directory '{}': {e}", updates_dir.display()),
            )
        })?;
        let free = fs2::available_space(&updates_dir).map_err(|e| {
            UpdateFailure::new("UpdateResourceCheckFailed", format!("disk space check failed: {e}"))
        })?;
        if free < MIN_FREE_BYTES {
            return Err(UpdateFailure::new(
                "UpdateResourceCheckFailed",
                format!("insufficient disk space: {free} bytes free, {MIN_FREE_BYTES} required"),
            ));
        }

        let package = updates_dir.join(manifest.package_filename());
        let extract_dir = updates_dir.join(manifest.extraction_dirname());

        // 2. Download
        self.transition(AgentState::UpdatingDownloading)?;
        if package.exists() {
            warn!(package = %package.display(), "stale package exists, removing");
            std::fs::remove_file(&package).map_err(|e| {
                UpdateFailure::new(
                    "UpdateDownloadFailed",
                    format!("failed to remove existing package: {e}"),
                )
            })?;
        }
        self.http.download(&manifest.download_url, &package).await.map_err(|e| {
            UpdateFailure::new("UpdateDownloadFailed", format!("download failed: {e}"))
                .cleanup(&[&package])
        })?;
        info!("download complete");

        // 3. Verify
        self.transition(AgentState::UpdatingVerifying)?;
        let actual = sha256_file(&package).map_err(|e| {
            UpdateFailure::new("UpdateChecksumMismatch", format!("checksum computation failed: {e}"))
                .cleanup(&[&package])
        })?;
        if !actual.eq_ignore_ascii_case(&manifest.checksum_sha256) {
            let mut details = Map::new();
            details.insert("expected_checksum".into(), manifest.checksum_sha256.clone().into());
            details.insert("actual_checksum".into(), actual.into());
            return Err(UpdateFailure::new("UpdateChecksumMismatch", "checksum mismatch")
                .details(details)
                .cleanup(&[&package]));
        }
        info!("checksum verified");

        // 4. Extract
        self.transition(AgentState::UpdatingExtracting)?;
        if extract_dir.exists() {
            warn!(dir = %extract_dir.display(), "stale extraction dir exists, removing");
            let _ = std::fs::remove_dir_all(&extract_dir);
        }
        extract_package(&package, &extract_dir).map_err(|e| {
            UpdateFailure::new("UpdateExtractionFailed", format!("extraction failed: {e}"))
                .cleanup(&[&extract_dir, &package])
        })?;
        info!("package extracted");

        // 5. Resolve binaries
        let new_agent = resolve_executable(&extract_dir, AGENT_BIN, &["agent"]).ok_or_else(|| {
            UpdateFailure::new(
                "UpdateExtractionFailed",
                format!("could not find new agent executable ({AGENT_BIN}) in package"),
            )
            .cleanup(&[&extract_dir, &package])
        })?;
        let current_agent = std::env::current_exe().map_err(|e| {
            UpdateFailure::new(
                "UpdatePreparationFailed",
                format!("could not determine current agent executable path: {e}"),
            )
            .cleanup(&[&extract_dir, &package])
        })?;

        // 6. Updater self-replace (when both sides are resolvable)
        let new_updater = resolve_executable(&extract_dir, UPDATER_BIN, &["updater"]);
        let current_updater = current_updater_path(&current_agent);
        let updater_to_launch = match (new_updater, current_updater) {
            (Some(new), Some(current)) => {
                info!(new = %new.display(), current = %current.display(), "replacing installed updater");
                self.transition(AgentState::UpdatingReplacingUpdater)?;
                if move_with_retry(&new, &current).await {
                    info!("updater replaced");
                } else {
                    // TODO: restore the previous updater from a backup if a
                    // later step fails (currently launches whatever is at
                    // the installed path).
                    warn!("updater replacement failed, launching installed updater");
                }
                current
            }
            (None, Some(current)) => {
                info!(updater = %current.display(), "no packaged updater, using installed one");
                current
            }
            (Some(new), None) => {
                warn!(updater = %new.display(), "no installed updater, launching from package");
                new
            }
            (None, None) => {
                return Err(UpdateFailure::new(
                    "UpdatePreparationFailed",
                    format!("could not find any updater ({UPDATER_BIN}), neither installed nor packaged"),
                )
                .cleanup(&[&extract_dir, &package]));
            }
        };

        // 7. Launch
        self.transition(AgentState::UpdatingPreparingShutdown)?;
        launch_updater(&updater_to_launch, &new_agent, &current_agent, self.store.layout().root())
            .map_err(|e| {
                UpdateFailure::new("UpdateLaunchFailed", format!("failed to launch updater: {e}"))
                    .cleanup(&[&extract_dir, &package])
            })?;
        info!("updater launched, scheduling agent shutdown");

        // 8. Shutdown on its own task so the triggering handler returns.
        let handle = Arc::clone(&self.handle);
        tokio::spawn(async move { handle.request_shutdown() });
        Ok(())
    }

    fn transition(&self, next: AgentState) -> Result<(), UpdateFailure> {
        if self.handle.set_state(next) {
            Ok(())
        } else {
            Err(UpdateFailure::new(
                "UpdateCriticalError",
                format!("state transition to {next} rejected"),
            ))
        }
    }

    /// Error epilogue: report, clean up, request IDLE (granted only from
    /// `UPDATING_STARTING`; later-stage failures leave the update state
    /// latched until restart).
    async fn handle_failure(&self, failure: UpdateFailure) {
        error!(error_type = failure.error_type, "update error: {}", failure.message);
        self.connector
            .report_error(failure.error_type, &failure.message, failure.details, None)
            .await;

        for path in &failure.cleanup {
            if !path.exists() {
                continue;
            }
            info!(path = %path.display(), "cleaning up");
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            if let Err(e) = result {
                warn!(path = %path.display(), %e, "cleanup failed");
            }
        }

        self.handle.set_state(AgentState::Idle);
    }
}

/// Installed updater: a sibling of the running agent executable.
fn current_updater_path(current_agent: &Path) -> Option<PathBuf> {
    let candidate = current_agent.parent()?.join(UPDATER_BIN);
    candidate.is_file().then_some(candidate)
}

/// Move with a small retry loop; the destination may be briefly locked.
async fn move_with_retry(src: &Path, dst: &Path) -> bool {
    for attempt in 1..=REPLACE_RETRIES {
        let result = if dst.exists() && std::fs::remove_file(dst).is_err() {
            Err(std::io::Error::other("destination busy"))
        } else {
            rename_or_copy(src, dst)
        };
        match result {
            Ok(()) => {
                info!(src = %src.display(), dst = %dst.display(), attempt, "moved");
                return true;
            }
            Err(e) => {
                warn!(attempt, %e, "move attempt failed");
                if attempt < REPLACE_RETRIES {
                    tokio::time::sleep(REPLACE_RETRY_DELAY).await;
                }
            }
        }
    }
    false
}

fn rename_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // Rename fails across filesystems; fall back to copy + remove.
        Err(_) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
    }
}

/// Launch the external updater as a detached process.
fn launch_updater(
    updater: &Path,
    new_agent: &Path,
    current_agent: &Path,
    storage_dir: &Path,
) -> std::io::Result<()> {
    let mut command = std::process::Command::new(updater);
    command
        .arg("--pid")
        .arg(std::process::id().to_string())
        .arg("--new_agent")
        .arg(new_agent)
        .arg("--current_agent")
        .arg(current_agent)
        .arg("--storage_dir")
        .arg(storage_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    detach(&mut command);
    info!(updater = %updater.display(), "launching updater");
    command.spawn().map(drop)
}

#[cfg(unix)]
fn detach(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    // New process group so the updater survives the agent's exit.
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    // DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP
    command.creation_flags(0x0000_0008 | 0x0000_0200);
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
