// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication sequence and ongoing server communication.
//!
//! The connector owns the path from "maybe we have a token" to a fully
//! authenticated session: token load, identification (with the MFA
//! sub-flow), inventory upload, and push-channel bring-up. It is also the
//! reporting surface for status samples and error uploads.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use cms_core::{DeviceIdentity, ErrorReport, RoomAssignment, SessionToken};
use cms_net::{EventSink, IdentifyStatus, PushClient, RequestClient, RequestError};
use cms_store::StateStore;

use crate::inspect::SystemInspector;
use crate::prompt::UserPrompter;

/// Budget for the push channel to confirm authentication.
const PUSH_AUTH_TIMEOUT: Duration = Duration::from_secs(20);
/// Per-file retry budget when draining the error spool.
const SPOOL_MAX_RETRIES: u32 = 3;
const SPOOL_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identification call failed: {0}")]
    Identify(RequestError),
    #[error("server rejected identification: {0}")]
    ServerRejected(String),
    #[error("server rejected agent position: {0}")]
    PositionError(String),
    #[error("server thinks agent is registered but no local token exists")]
    NoLocalToken,
    #[error("MFA prompt cancelled by user")]
    MfaCancelled,
    #[error("MFA verification failed: {0}")]
    MfaFailed(String),
    #[error("hardware info upload failed: {0}")]
    HardwareUpload(RequestError),
    #[error("push channel authentication failed or timed out")]
    PushAuth,
}

pub struct ServerConnector {
    store: Arc<StateStore>,
    http: Arc<RequestClient>,
    push: Arc<PushClient>,
    inspector: Arc<dyn SystemInspector>,
    prompter: Arc<dyn UserPrompter>,
    event_sink: Arc<dyn EventSink>,
    device_id: DeviceIdentity,
    drain_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServerConnector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        http: Arc<RequestClient>,
        push: Arc<PushClient>,
        inspector: Arc<dyn SystemInspector>,
        prompter: Arc<dyn UserPrompter>,
        event_sink: Arc<dyn EventSink>,
        device_id: DeviceIdentity,
    ) -> Self {
        ServerConnector {
            store,
            http,
            push,
            inspector,
            prompter,
            event_sink,
            device_id,
            drain_task: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &DeviceIdentity {
        &self.device_id
    }

    /// Full authentication sequence. On success the returned token is the
    /// live session token, already published to the request client and
    /// confirmed by the push channel.
    pub async fn authenticate(&self, room: &RoomAssignment) -> Result<SessionToken, AuthError> {
        info!("--- starting full authentication process ---");

        let token = match self.store.load_token(&self.device_id) {
            Some(token) => {
                // A loaded token is authoritative until the server says
                // otherwise.
                info!("found existing agent token");
                token
            }
            None => {
                info!("no existing token, identifying with server");
                self.identify(room).await?
            }
        };

        self.http.set_auth(&self.device_id, &token);

        self.send_hardware_info().await.map_err(AuthError::HardwareUpload)?;
        info!("hardware info sent");

        self.push.connect_and_authenticate(&self.device_id, &token, Arc::clone(&self.event_sink));
        if !self.push.wait_for_authenticated(PUSH_AUTH_TIMEOUT).await {
            error!("push channel did not authenticate in time");
            self.push.disconnect();
            return Err(AuthError::PushAuth);
        }

        info!("--- full authentication successful ---");
        Ok(token)
    }

    async fn identify(&self, room: &RoomAssignment) -> Result<SessionToken, AuthError> {
        let response = self
            .http
            .identify(&self.device_id, Some(room.position_info()), false)
            .await
            .map_err(AuthError::Identify)?;

        let message = response.message.clone().unwrap_or_else(|| "no message".to_string());
        match response.status {
            IdentifyStatus::Registered | IdentifyStatus::Success => {
                match response.agent_token {
                    Some(secret) => {
                        let token = SessionToken(secret);
                        self.persist_token(&token);
                        Ok(token)
                    }
                    None => {
                        // Server already knows this device; we must have
                        // the token from a previous life.
                        info!(%message, "server reports agent already registered");
                        self.store
                            .load_token(&self.device_id)
                            .ok_or(AuthError::NoLocalToken)
                    }
                }
            }
            IdentifyStatus::MfaRequired => self.verify_mfa().await,
            IdentifyStatus::PositionError => {
                error!(room = %room.room, x = room.position.x, y = room.position.y, "position conflict");
                Err(AuthError::PositionError(message))
            }
            IdentifyStatus::Error | IdentifyStatus::Unknown => {
                Err(AuthError::ServerRejected(message))
            }
        }
    }

    async fn verify_mfa(&self) -> Result<SessionToken, AuthError> {
        info!("MFA required for registration");
        let code = self.prompter.prompt_mfa().ok_or(AuthError::MfaCancelled)?;
        let response = self
            .http
            .verify_mfa(&self.device_id, &code)
            .await
            .map_err(|e| AuthError::MfaFailed(e.to_string()))?;

        match (response.status, response.agent_token) {
            (IdentifyStatus::Success | IdentifyStatus::Registered, Some(secret)) => {
                let token = SessionToken(secret);
                self.persist_token(&token);
                self.prompter.display_registration_success();
                Ok(token)
            }
            (_, _) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Invalid MFA code or it has expired.".to_string());
                Err(AuthError::MfaFailed(message))
            }
        }
    }

    fn persist_token(&self, token: &SessionToken) {
        if let Err(e) = self.store.put_token(&self.device_id, token) {
            // The session still works, but the next restart will have to
            // re-register.
            error!(%e, "CRITICAL: failed to persist session token");
        }
    }

    async fn send_hardware_info(&self) -> Result<(), RequestError> {
        let inventory = self.inspector.hardware_inventory();
        self.http.send_hardware_info(&inventory).await
    }

    /// Sample usage and emit one status update. Drops (warn-logged by the
    /// push client) when the channel is not authenticated.
    pub fn send_status_once(&self) {
        let sample = self.inspector.usage_sample();
        if !self.push.send_status_update(&sample) {
            warn!("status update not sent");
        }
    }

    /// Report an error to the backend, spooling it locally when the
    /// upload fails.
    pub async fn report_error(
        &self,
        error_type: &str,
        message: &str,
        details: Option<serde_json::Map<String, Value>>,
        stack_trace: Option<String>,
    ) {
        error!(error_type, message, "reporting error to backend");
        let report = ErrorReport::new(error_type, message, details, stack_trace);
        let body = match serde_json::to_value(&report) {
            Ok(body) => body,
            Err(e) => {
                error!(%e, "error report not serializable");
                return;
            }
        };
        if let Err(e) = self.http.report_error(&body).await {
            warn!(%e, "error upload failed, spooling for later");
            let spool = self.store.error_spool();
            match spool.save(&report) {
                Ok(path) => info!(path = %path.display(), "error report spooled"),
                Err(e) => error!(%e, "failed to spool error report"),
            }
        }
    }

    /// Drain the spool once, retrying each file a few times. Returns
    /// `(sent, total)`.
    pub async fn drain_error_spool(&self) -> (usize, usize) {
        let spool = self.store.error_spool();
        let files = spool.list();
        if files.is_empty() {
            info!("no buffered error reports to send");
            return (0, 0);
        }
        info!(count = files.len(), "draining buffered error reports");

        let mut sent = 0;
        for path in &files {
            let Some(body) = spool.read(path) else {
                warn!(path = %path.display(), "unreadable spool file, skipping");
                continue;
            };
            for attempt in 1..=SPOOL_MAX_RETRIES {
                match self.http.report_error(&body).await {
                    Ok(()) => {
                        spool.remove(path);
                        sent += 1;
                        break;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), attempt, %e, "spooled report upload failed");
                        if attempt < SPOOL_MAX_RETRIES {
                            tokio::time::sleep(SPOOL_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
        info!(sent, total = files.len(), "error spool drain finished");
        (sent, files.len())
    }

    /// Background drain after a successful authentication.
    pub fn spawn_spool_drain(self: &Arc<Self>) {
        let mut slot = self.drain_task.lock();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("error spool drain already running");
            return;
        }
        let connector = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let _ = connector.drain_error_spool().await;
        }));
    }

    /// Shutdown helper: wait (bounded) for an in-flight drain to finish.
    pub async fn wait_for_spool_drain(&self, timeout: Duration) {
        let task = self.drain_task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("error spool drain did not finish within timeout");
            }
        }
    }
}

#[cfg(test)]
#[path = "connector_tests.rs"]
mod tests;
