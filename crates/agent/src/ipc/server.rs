// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC server: accepts one-request connections, authenticates the caller
//! against the live session token, and implements the `force_restart`
//! handshake.
//!
//! The endpoint is a unix domain socket on unix and a named pipe on
//! windows; everything above the transport is shared.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cms_core::SessionToken;

use crate::agent::AgentHandle;
use crate::token::TokenSink;

use super::protocol::{read_message, write_message, IpcRequest, IpcResponse, IpcStatus};

/// Pre-authentication token. Ordinary clients never know it, so every
/// request before the first successful authentication fails
/// `invalid_token`.
pub const PLACEHOLDER_TOKEN: &str = "123";

/// Per-message read/write budget.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between the acknowledged reply and the restart, so the response
/// is flushed before shutdown begins.
const RESTART_ACK_DELAY: Duration = Duration::from_millis(100);

struct ServerInner {
    socket_path: PathBuf,
    token: RwLock<String>,
    agent: Arc<AgentHandle>,
    shutdown: CancellationToken,
}

pub struct IpcServer {
    inner: Arc<ServerInner>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, agent: Arc<AgentHandle>) -> IpcServer {
        IpcServer {
            inner: Arc::new(ServerInner {
                socket_path,
                token: RwLock::new(PLACEHOLDER_TOKEN.to_string()),
                agent,
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Replace the token used for request validation.
    pub fn update_token(&self, new_token: &str) {
        if new_token.is_empty() {
            warn!("refusing to install an empty IPC token");
            return;
        }
        *self.inner.token.write() = new_token.to_string();
        info!("IPC server token updated");
    }

    /// Bind the endpoint and start the accept loop.
    #[cfg(unix)]
    pub async fn start(&self) -> std::io::Result<()> {
        let path = &self.inner.socket_path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A previous instance's socket file would make bind fail.
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        restrict_socket(path);
        info!(path = %path.display(), "IPC server listening");

        let inner = Arc::clone(&self.inner);
        *self.task.lock() = Some(tokio::spawn(accept_loop(inner, listener)));
        Ok(())
    }

    /// Create the first pipe instance and start the accept loop.
    #[cfg(windows)]
    pub async fn start(&self) -> std::io::Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let name = self.inner.socket_path.to_string_lossy().into_owned();
        // Claiming the first instance fails when another process already
        // serves this pipe name.
        let first = ServerOptions::new().first_pipe_instance(true).create(&name)?;
        info!(pipe = %name, "IPC server listening");

        let inner = Arc::clone(&self.inner);
        *self.task.lock() = Some(tokio::spawn(accept_loop(inner, name, first)));
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    pub async fn start(&self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "IPC is not supported on this platform",
        ))
    }

    /// Signal the accept loop to stop and remove the endpoint.
    pub fn stop(&self) {
        debug!("stopping IPC server");
        self.inner.shutdown.cancel();
        // A named pipe disappears with its handles; the socket file does
        // not.
        #[cfg(unix)]
        if self.inner.socket_path.exists() {
            let _ = std::fs::remove_file(&self.inner.socket_path);
        }
    }

    /// Wait for the accept loop to exit, bounded by `timeout`.
    pub async fn join(&self, timeout: Duration) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("IPC accept loop did not stop within timeout");
            }
        }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.inner.socket_path
    }
}

impl TokenSink for IpcServer {
    fn token_updated(&self, token: &SessionToken) {
        self.update_token(token.as_str());
    }
}

#[cfg(unix)]
async fn accept_loop(inner: Arc<ServerInner>, listener: UnixListener) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&inner, stream).await {
                                debug!(error = %e, "IPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(%e, "IPC accept error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            _ = inner.shutdown.cancelled() => break,
        }
    }
    debug!("IPC accept loop finished");
}

/// Named pipes accept one client per instance: hand the connected
/// instance to a task and immediately create the next one.
#[cfg(windows)]
async fn accept_loop(
    inner: Arc<ServerInner>,
    name: String,
    mut server: tokio::net::windows::named_pipe::NamedPipeServer,
) {
    use tokio::net::windows::named_pipe::ServerOptions;
    loop {
        tokio::select! {
            connected = server.connect() => {
                match connected {
                    Ok(()) => {
                        let next = match ServerOptions::new().create(&name) {
                            Ok(next) => next,
                            Err(e) => {
                                error!(%e, "failed to create next pipe instance");
                                break;
                            }
                        };
                        let connection = std::mem::replace(&mut server, next);
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&inner, connection).await {
                                debug!(error = %e, "IPC connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(%e, "pipe connect error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            _ = inner.shutdown.cancelled() => break,
        }
    }
    debug!("IPC accept loop finished");
}

async fn handle_connection<S>(
    inner: &ServerInner,
    mut stream: S,
) -> Result<(), super::protocol::ProtocolError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let request: IpcRequest = match read_message(&mut stream, MESSAGE_TIMEOUT).await {
        Ok(request) => request,
        Err(e) => {
            let _ = write_message(
                &mut stream,
                &IpcResponse::error("Invalid request format"),
                MESSAGE_TIMEOUT,
            )
            .await;
            return Err(e);
        }
    };

    let response = evaluate_request(inner, &request);
    write_message(&mut stream, &response, MESSAGE_TIMEOUT).await?;

    // Restart only after the reply has been written and flushed.
    if response.status == IpcStatus::Acknowledged {
        let agent = Arc::clone(&inner.agent);
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_ACK_DELAY).await;
            agent.request_restart();
        });
    }
    Ok(())
}

/// Validation order: token, then busy-updating, then command dispatch.
fn evaluate_request(inner: &ServerInner, request: &IpcRequest) -> IpcResponse {
    if request.token.is_empty() || request.token != *inner.token.read() {
        warn!("IPC request with invalid or missing token");
        return IpcResponse::status(IpcStatus::InvalidToken);
    }

    let state = inner.agent.state();
    if state.is_updating() {
        warn!(%state, "rejecting force_restart during update");
        return IpcResponse::status(IpcStatus::BusyUpdating);
    }

    if request.command == "force_restart" {
        info!("acknowledging force_restart command");
        return IpcResponse::status(IpcStatus::Acknowledged);
    }

    warn!(command = %request.command, "unknown IPC command");
    IpcResponse::status(IpcStatus::UnknownCommand)
}

/// Owner-only endpoint: directory and socket both 0700/0600.
#[cfg(unix)]
fn restrict_socket(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), %e, "failed to restrict IPC socket");
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
