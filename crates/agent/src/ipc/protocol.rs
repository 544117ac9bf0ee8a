// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message framing for the IPC endpoint.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request and response are each capped at 4 KiB.
pub const MAX_MESSAGE_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IPC timeout")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("message too large ({0} bytes)")]
    TooLarge(u32),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IPC io error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    }
}

/// One request per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub command: String,
    pub token: String,
    /// Arguments the replacement instance should start with.
    #[serde(default)]
    pub new_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub status: IpcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IpcResponse {
    pub fn status(status: IpcStatus) -> Self {
        IpcResponse { status, message: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse { status: IpcStatus::Error, message: Some(message.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpcStatus {
    Acknowledged,
    InvalidToken,
    BusyUpdating,
    UnknownCommand,
    Error,
    /// Client-side only: the endpoint does not exist.
    AgentNotRunning,
}

pub async fn write_message<W, T>(
    writer: &mut W,
    message: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(body.len() as u32));
    }
    let frame = async {
        writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok::<_, ProtocolError>(())
    };
    tokio::time::timeout(timeout, frame).await.map_err(|_| ProtocolError::Timeout)?
}

pub async fn read_message<R, T>(reader: &mut R, timeout: Duration) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = async {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes);
        if len as usize > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        Ok::<_, ProtocolError>(serde_json::from_slice(&body)?)
    };
    tokio::time::timeout(timeout, frame).await.map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
