// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AgentCore: the top-level state machine and lifecycle coordinator.
//!
//! All state mutation goes through [`AgentHandle::set_state`], which
//! enforces the transition legality gate. Long-lived tasks (status
//! reporter, IPC accept loop, command workers, push reader) observe the
//! shared shutdown token instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cms_core::{AgentState, RoomAssignment};
use cms_net::{EventSink, PushClient};

use crate::connector::ServerConnector;
use crate::executor::CommandExecutor;
use crate::ipc::IpcServer;
use crate::singleton::SingletonGuard;
use crate::token::SessionTokenHandle;
use crate::update::UpdateEngine;

/// Backoff between failed authentication attempts.
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(10);
/// How long shutdown waits for the error-spool drain to finish.
const DRAIN_WAIT: Duration = Duration::from_secs(10);
/// How long shutdown waits for the IPC accept loop to exit.
const IPC_JOIN_WAIT: Duration = Duration::from_secs(5);

/// Shared, thread-safe view of the agent lifecycle.
pub struct AgentHandle {
    state: Mutex<AgentState>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for AgentHandle {
    fn default() -> Self {
        AgentHandle {
            state: Mutex::new(AgentState::Starting),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }
}

impl AgentHandle {
    pub fn new() -> Arc<AgentHandle> {
        Arc::new(AgentHandle::default())
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// Gated state transition. Returns whether the state changed.
    pub fn set_state(&self, next: AgentState) -> bool {
        let mut state = self.state.lock();
        let current = *state;
        if !current.allows_transition_to(next) {
            warn!(%current, %next, "blocked state transition");
            return false;
        }
        if current == next {
            return false;
        }
        info!(%current, %next, "state transition");
        *state = next;
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask the supervisor to shut the agent down.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Called by the IPC server on an accepted `force_restart`.
    pub fn request_restart(&self) {
        info!("restart requested via IPC, initiating shutdown");
        self.set_state(AgentState::ForceRestarting);
        self.shutdown.cancel();
    }
}

/// Everything the supervisor needs to run one agent lifetime.
pub struct Agent {
    pub handle: Arc<AgentHandle>,
    pub connector: Arc<ServerConnector>,
    pub executor: Arc<CommandExecutor>,
    pub push: Arc<PushClient>,
    pub ipc: Arc<IpcServer>,
    pub update: Arc<UpdateEngine>,
    pub tokens: SessionTokenHandle,
    pub singleton: SingletonGuard,
    pub room: RoomAssignment,
    pub status_interval: Duration,
}

/// Routes push events into the executor and the update engine.
///
/// The update engine is late-bound: the sink is constructed before the
/// engine (the engine's error reporting needs the connector, which needs
/// this sink).
pub struct AgentEventSink {
    executor: Arc<CommandExecutor>,
    update: Mutex<Option<Arc<UpdateEngine>>>,
    handle: Arc<AgentHandle>,
}

impl AgentEventSink {
    pub fn new(executor: Arc<CommandExecutor>, handle: Arc<AgentHandle>) -> Self {
        AgentEventSink { executor, update: Mutex::new(None), handle }
    }

    pub fn set_update_engine(&self, update: Arc<UpdateEngine>) {
        *self.update.lock() = Some(update);
    }
}

impl EventSink for AgentEventSink {
    fn on_command(&self, payload: Value) {
        self.executor.submit(payload);
    }

    fn on_new_version(&self, new_stable_version: String) {
        let state = self.handle.state();
        if state != AgentState::Idle {
            info!(%state, "ignoring version notification: agent not idle");
            return;
        }
        if new_stable_version == cms_core::AGENT_VERSION {
            info!(version = %new_stable_version, "already running notified version");
            return;
        }
        let Some(update) = self.update.lock().clone() else {
            warn!("version notification before update engine is wired, ignoring");
            return;
        };
        // The nudge is not the manifest: consult the server for one.
        tokio::spawn(async move { update.check_and_initiate().await });
    }
}

/// Executor results go out over the push channel.
pub struct PushResultSink(pub Arc<PushClient>);

impl crate::executor::ResultSink for PushResultSink {
    fn send_result(&self, command_id: &str, result: &cms_core::CommandResult) {
        if !self.0.send_command_result(command_id, result) {
            error!(command_id, "failed to emit command result");
        }
    }
}

/// Published tokens become the request client's bearer credentials.
pub struct HttpTokenSink {
    pub http: Arc<cms_net::RequestClient>,
    pub device_id: cms_core::DeviceIdentity,
}

impl crate::token::TokenSink for HttpTokenSink {
    fn token_updated(&self, token: &cms_core::SessionToken) {
        self.http.set_auth(&self.device_id, token);
    }
}

impl Agent {
    /// Run the agent until shutdown is requested, then tear down in
    /// order. Returns the final state so the caller can pick an exit
    /// strategy.
    pub async fn run(&self) -> AgentState {
        info!("================ Starting Agent ================");
        self.handle.running.store(true, Ordering::SeqCst);
        let shutdown = self.handle.shutdown_token();

        // IPC first so `--force` callers get a definite answer during
        // startup; pre-auth requests fail invalid_token until the real
        // token is published.
        if let Err(e) = self.ipc.start().await {
            error!(%e, "IPC server failed to start, continuing without IPC");
        }

        // Authenticate with retry until shutdown is requested.
        let authenticated = loop {
            if shutdown.is_cancelled() {
                break false;
            }
            match self.connector.authenticate(&self.room).await {
                Ok(token) => {
                    info!("authentication successful");
                    self.tokens.publish(token);
                    self.connector.spawn_spool_drain();
                    break true;
                }
                Err(e) => {
                    warn!(%e, "authentication failed, retrying in {}s", AUTH_RETRY_DELAY.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(AUTH_RETRY_DELAY) => {}
                        _ = shutdown.cancelled() => break false,
                    }
                }
            }
        };

        if authenticated {
            self.executor.start_workers();
            self.spawn_status_reporter();
            self.handle.set_state(AgentState::Idle);
            info!("agent started, monitoring for commands and reporting status");

            // One-shot proactive update check.
            if self.handle.state() == AgentState::Idle {
                let update = Arc::clone(&self.update);
                tokio::spawn(async move { update.check_and_initiate().await });
            }

            shutdown.cancelled().await;
        } else {
            error!("authentication aborted, agent is shutting down");
        }

        self.graceful_shutdown().await
    }

    fn spawn_status_reporter(&self) {
        let connector = Arc::clone(&self.connector);
        let handle = Arc::clone(&self.handle);
        let shutdown = self.handle.shutdown_token();
        let interval = self.status_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate tick is not a report
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !handle.is_running() {
                            break;
                        }
                        connector.send_status_once();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Ordered, idempotent teardown.
    pub async fn graceful_shutdown(&self) -> AgentState {
        let current = self.handle.state();
        if matches!(current, AgentState::ShuttingDown | AgentState::Stopped) {
            return current;
        }
        if current != AgentState::ForceRestarting {
            self.handle.set_state(AgentState::ShuttingDown);
        } else {
            info!("proceeding with shutdown due to force restart request");
        }

        info!("================ Initiating Graceful Shutdown ================");
        self.handle.running.store(false, Ordering::SeqCst);
        self.handle.shutdown.cancel();

        self.connector.wait_for_spool_drain(DRAIN_WAIT).await;
        self.ipc.stop();
        self.executor.stop(true).await;
        self.push.disconnect();
        self.ipc.join(IPC_JOIN_WAIT).await;
        self.singleton.release();

        self.handle.set_state(AgentState::Stopped);
        info!("================ Agent Shutdown Complete ================");
        // The caller flushes logs and exits; after an update hand-off
        // (UPDATING_PREPARING_SHUTDOWN) it must not force the exit.
        current
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
