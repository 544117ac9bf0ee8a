// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push channel: long-lived bidirectional typed-event stream.
//!
//! The transport reconnects on its own (randomized exponential backoff);
//! the application layer additionally requires a server-sent
//! `agent:ws_auth_success` before anything may be emitted. Observable
//! states: disconnected, transport-connected-unauthenticated,
//! authenticated.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cms_core::{CommandResult, DeviceIdentity, SessionToken};

use crate::events::{self, parse_server_event, ServerEvent, StatusUpdate};

/// Outgoing frames queued between emitters and the writer task.
const OUTGOING_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("invalid push channel url: {0}")]
    InvalidUrl(String),
}

/// Observable connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    /// Transport is up but the server has not confirmed authentication.
    Connected,
    Authenticated,
}

/// Typed consumer of server-initiated events.
pub trait EventSink: Send + Sync + 'static {
    /// A `command:execute` payload with a validated command id.
    fn on_command(&self, payload: Value);
    /// An `agent:new_version_available` nudge.
    fn on_new_version(&self, new_stable_version: String);
}

/// Transport reconnect schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// `None` reconnects forever.
    pub max_attempts: Option<u32>,
    /// Fractional jitter applied symmetrically around the base delay.
    pub randomization: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            max_attempts: None,
            randomization: 0.5,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic exponential delay for the given attempt (1-based),
    /// capped at `max`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.initial.as_secs_f64() * 2f64.powi(exponent as i32);
        Duration::from_secs_f64(raw.min(self.max.as_secs_f64()))
    }

    /// Base delay with randomization applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let factor = 1.0 + self.randomization * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_secs_f64((base * factor).max(0.0))
    }

    /// Whether another reconnect attempt is allowed.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

#[derive(Clone)]
struct Credentials {
    agent_id: String,
    token: String,
}

struct Shared {
    ws_url: String,
    policy: ReconnectPolicy,
    credentials: RwLock<Option<Credentials>>,
    state_tx: watch::Sender<PushState>,
    state_rx: watch::Receiver<PushState>,
    /// Sender for the current connection generation; replaced on
    /// every (re)connect so an intentional disconnect can be followed
    /// by a fresh session.
    outgoing_tx: RwLock<mpsc::Sender<String>>,
    shutdown: RwLock<CancellationToken>,
}

impl Shared {
    fn set_state(&self, next: PushState) {
        let previous = *self.state_rx.borrow();
        if previous != next {
            debug!(?previous, ?next, "push channel state change");
            let _ = self.state_tx.send(next);
        }
    }

    fn state(&self) -> PushState {
        *self.state_rx.borrow()
    }

    fn agent_id(&self) -> Option<String> {
        self.credentials.read().as_ref().map(|c| c.agent_id.clone())
    }

    /// Queue an emission; requires the authenticated state.
    fn emit(&self, event: &str, data: Value) -> bool {
        if self.state() != PushState::Authenticated {
            warn!(event, "emission dropped: push channel not authenticated");
            return false;
        }
        match self.outgoing_tx.read().try_send(events::frame(event, data)) {
            Ok(()) => true,
            Err(e) => {
                warn!(event, error = %e, "emission dropped: outgoing queue unavailable");
                false
            }
        }
    }
}

/// The agent side of the push channel.
pub struct PushClient {
    shared: Arc<Shared>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PushClient {
    pub fn new(server_url: &str, policy: ReconnectPolicy) -> Result<PushClient, PushError> {
        let ws_url = websocket_url(server_url)?;
        let (state_tx, state_rx) = watch::channel(PushState::Disconnected);
        // Replaced per connection generation; this initial sender only
        // exists so emit() always has something to refuse politely.
        let (outgoing_tx, _unused_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        info!(%ws_url, "push client initialized");
        Ok(PushClient {
            shared: Arc::new(Shared {
                ws_url,
                policy,
                credentials: RwLock::new(None),
                state_tx,
                state_rx,
                outgoing_tx: RwLock::new(outgoing_tx),
                shutdown: RwLock::new(CancellationToken::new()),
            }),
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> PushState {
        self.shared.state()
    }

    /// Start the connection task with the given credentials. Does not
    /// block; authentication is observed via [`wait_for_authenticated`].
    ///
    /// [`wait_for_authenticated`]: PushClient::wait_for_authenticated
    pub fn connect_and_authenticate(
        &self,
        agent_id: &DeviceIdentity,
        token: &SessionToken,
        sink: Arc<dyn EventSink>,
    ) -> bool {
        if agent_id.as_str().is_empty() || token.as_str().is_empty() {
            error!("push connect rejected: agent id and token are required");
            return false;
        }

        *self.shared.credentials.write() = Some(Credentials {
            agent_id: agent_id.as_str().to_string(),
            token: token.as_str().to_string(),
        });

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("push connect skipped: connection task already running");
            return self.shared.state() == PushState::Authenticated;
        }

        // Fresh generation: new outgoing queue, new shutdown token.
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        *self.shared.outgoing_tx.write() = outgoing_tx;
        let generation = CancellationToken::new();
        *self.shared.shutdown.write() = generation.clone();

        info!(agent_id = %agent_id, "starting push channel connection");
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run_connection_loop(shared, generation, outgoing_rx, sink)));
        true
    }

    /// Block until the server confirms authentication, or `timeout`.
    pub async fn wait_for_authenticated(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == PushState::Authenticated))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Intentional disconnect; the reconnector stops. A later
    /// `connect_and_authenticate` starts a fresh session.
    pub fn disconnect(&self) {
        info!("disconnecting push channel");
        self.shared.shutdown.read().cancel();
        self.shared.set_state(PushState::Disconnected);
    }

    pub fn send_status_update(&self, status: &StatusUpdate) -> bool {
        let mut data = match serde_json::to_value(status) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if let Some(agent_id) = self.shared.agent_id() {
            data["agentId"] = Value::String(agent_id);
        }
        self.shared.emit("agent:status_update", data)
    }

    pub fn send_command_result(&self, command_id: &str, result: &CommandResult) -> bool {
        if command_id.is_empty() {
            error!("cannot send command result without a command id");
            return false;
        }
        let mut data = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                error!(command_id, error = %e, "command result not serializable");
                return false;
            }
        };
        data["commandId"] = Value::String(command_id.to_string());
        if let Some(agent_id) = self.shared.agent_id() {
            data["agentId"] = Value::String(agent_id);
        }
        self.shared.emit("agent:command_result", data)
    }
}

/// Convert the configured server url into the websocket endpoint.
fn websocket_url(server_url: &str) -> Result<String, PushError> {
    let trimmed = server_url.trim_end_matches('/');
    let converted = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(PushError::InvalidUrl(format!(
            "server_url must include a scheme: {server_url}"
        )));
    };
    Ok(format!("{converted}/ws"))
}

enum DropReason {
    /// Shutdown requested or the emitters went away.
    Intentional,
    /// Transport failed; the reconnector takes over.
    Transport,
}

async fn run_connection_loop(
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    mut outgoing_rx: mpsc::Receiver<String>,
    sink: Arc<dyn EventSink>,
) {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match connect(&shared).await {
            Ok(ws) => {
                attempt = 0;
                info!("push transport connected, waiting for authentication confirmation");
                shared.set_state(PushState::Connected);
                let reason =
                    drive_connection(&shared, &shutdown, ws, &mut outgoing_rx, sink.as_ref())
                        .await;
                shared.set_state(PushState::Disconnected);
                match reason {
                    DropReason::Intentional => break,
                    DropReason::Transport => {
                        warn!("push connection lost, reconnect scheduled");
                    }
                }
            }
            Err(e) => warn!(error = %e, "push transport connect failed"),
        }

        attempt += 1;
        if !shared.policy.allows_attempt(attempt) {
            error!(attempt, "push reconnect attempts exhausted");
            break;
        }
        let delay = shared.policy.jittered_delay(attempt);
        debug!(attempt, ?delay, "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }
    shared.set_state(PushState::Disconnected);
    debug!("push connection loop finished");
}

async fn connect(
    shared: &Shared,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, String> {
    let credentials =
        shared.credentials.read().clone().ok_or_else(|| "credentials not set".to_string())?;

    // Authentication travels both in the upgrade headers and in-band;
    // servers may honor either.
    let mut request = shared.ws_url.as_str().into_client_request().map_err(|e| e.to_string())?;
    let headers = request.headers_mut();
    headers.insert("Agent-ID", credentials.agent_id.parse().map_err(|_| "bad agent id")?);
    headers.insert(
        "Authorization",
        format!("Bearer {}", credentials.token).parse().map_err(|_| "bad token")?,
    );
    headers.insert("X-Client-Type", "agent".parse().map_err(|_| "bad header")?);

    let (ws, _) = tokio_tungstenite::connect_async(request).await.map_err(|e| e.to_string())?;
    Ok(ws)
}

async fn drive_connection(
    shared: &Shared,
    shutdown: &CancellationToken,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing_rx: &mut mpsc::Receiver<String>,
    sink: &dyn EventSink,
) -> DropReason {
    let (mut write, mut read) = ws.split();

    // In-band auth payload, first frame on the wire.
    let auth_frame = {
        let credentials = shared.credentials.read().clone();
        match credentials {
            Some(c) => {
                events::frame("agent:authenticate", json!({"agentId": c.agent_id, "token": c.token}))
            }
            None => return DropReason::Intentional,
        }
    };
    if write.send(Message::text(auth_frame)).await.is_err() {
        return DropReason::Transport;
    }

    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_server_event(text.as_str()) {
                            handle_server_event(shared, sink, event);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "push channel closed by server");
                        return DropReason::Transport;
                    }
                    Some(Ok(_)) => {} // Ping/Pong/Binary
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel read error");
                        return DropReason::Transport;
                    }
                    None => return DropReason::Transport,
                }
            }
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if write.send(Message::text(text)).await.is_err() {
                            return DropReason::Transport;
                        }
                    }
                    None => return DropReason::Intentional,
                }
            }
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return DropReason::Intentional;
            }
        }
    }
}

fn handle_server_event(shared: &Shared, sink: &dyn EventSink, event: ServerEvent) {
    match event {
        ServerEvent::AuthSuccess => {
            info!("push channel authentication confirmed by server");
            shared.set_state(PushState::Authenticated);
        }
        ServerEvent::AuthFailed { message } => {
            // No automatic retry: the caller decides what to do with a
            // rejected session.
            error!(%message, "push channel authentication failed");
            shared.set_state(PushState::Connected);
        }
        ServerEvent::CommandExecute(payload) => {
            if shared.state() != PushState::Authenticated {
                warn!("ignoring command: push channel not authenticated");
                return;
            }
            let command_id = payload
                .get("commandId")
                .or_else(|| payload.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let Some(command_id) = command_id else {
                error!("received command without 'commandId' or 'id', dropping");
                return;
            };
            if payload.get("command").map_or(true, Value::is_null) {
                error!(command_id, "received command without payload");
                let data = json!({
                    "type": "console",
                    "success": false,
                    "result": {
                        "stdout": "",
                        "stderr": "Agent Error: Missing command payload",
                        "exitCode": -1,
                    },
                    "commandId": command_id,
                    "agentId": shared.agent_id(),
                });
                shared.emit("agent:command_result", data);
                return;
            }
            debug!(command_id, "routing command to executor");
            sink.on_command(payload);
        }
        ServerEvent::NewVersionAvailable { new_stable_version } => {
            if shared.state() != PushState::Authenticated {
                warn!("ignoring version notification: push channel not authenticated");
                return;
            }
            if new_stable_version.is_empty() {
                warn!("version notification missing 'new_stable_version', ignoring");
                return;
            }
            info!(version = %new_stable_version, "new agent version available");
            sink.on_new_version(new_stable_version);
        }
        ServerEvent::Unknown(name) => debug!(event = %name, "unsubscribed push event"),
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
