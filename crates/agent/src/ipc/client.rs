// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC client used by a second invocation (`--force`) to ask the running
//! agent to shut down. Connects over a unix socket or a named pipe,
//! matching the server's transport.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::protocol::{read_message, write_message, IpcRequest, IpcResponse, IpcStatus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(unix)]
async fn connect_endpoint(path: &Path) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(path).await
}

#[cfg(windows)]
async fn connect_endpoint(
    path: &Path,
) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

#[cfg(not(any(unix, windows)))]
async fn connect_endpoint(_path: &Path) -> std::io::Result<tokio::io::DuplexStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "IPC is not supported on this platform",
    ))
}

/// Send a `force_restart` to the agent listening at `socket_path`.
/// Returns `agent_not_running` when no endpoint exists.
pub async fn send_force_command(
    socket_path: &Path,
    new_args: Vec<String>,
    token: &str,
) -> IpcResponse {
    info!(path = %socket_path.display(), "connecting to running agent");
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_endpoint(socket_path)).await;
    let mut stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            info!(error = %e, "no running agent at endpoint");
            return IpcResponse {
                status: IpcStatus::AgentNotRunning,
                message: Some(e.to_string()),
            };
        }
        Err(_) => {
            warn!("IPC connect timed out");
            return IpcResponse {
                status: IpcStatus::AgentNotRunning,
                message: Some("connect timeout".to_string()),
            };
        }
    };

    let request = IpcRequest {
        command: "force_restart".to_string(),
        token: token.to_string(),
        new_args,
    };
    if let Err(e) = write_message(&mut stream, &request, REPLY_TIMEOUT).await {
        return IpcResponse::error(format!("failed to send request: {e}"));
    }

    match read_message::<_, IpcResponse>(&mut stream, REPLY_TIMEOUT).await {
        Ok(response) => {
            info!(status = ?response.status, "received IPC response");
            response
        }
        Err(e) => IpcResponse::error(format!("failed to read response: {e}")),
    }
}
