// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command envelopes delivered over the push channel and the results
//! emitted back for every accepted command.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command envelope was malformed (missing id / missing payload).
pub const ERROR_TYPE_INPUT: &str = "InputError";
/// Executor queue was full; command rejected at intake.
pub const ERROR_TYPE_QUEUE: &str = "QueueError";
/// Handler failed, panicked, or no handler exists for the type.
pub const ERROR_TYPE_HANDLER: &str = "HandlerError";
/// Worker-level failure outside any handler.
pub const ERROR_TYPE_EXECUTOR: &str = "ExecutorError";

/// A validated command received from the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub id: String,
    /// Dispatch key, lowercased (`console` or `system` today).
    pub command_type: String,
    pub command: String,
}

/// Why a raw `command:execute` payload failed validation.
///
/// Carries enough context for the caller to synthesize an error result
/// when an id is present.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("command message missing required 'commandId' or 'id'")]
    MissingId,
    #[error("required 'command' field is missing")]
    MissingCommand { id: String, command_type: String },
    #[error("'command' field must be a string")]
    CommandNotAString { id: String, command_type: String },
    #[error("'command' field cannot be empty or whitespace")]
    EmptyCommand { id: String, command_type: String },
}

impl EnvelopeError {
    /// Command id, when the payload carried one.
    pub fn id(&self) -> Option<&str> {
        match self {
            EnvelopeError::MissingId => None,
            EnvelopeError::MissingCommand { id, .. }
            | EnvelopeError::CommandNotAString { id, .. }
            | EnvelopeError::EmptyCommand { id, .. } => Some(id),
        }
    }

    pub fn command_type(&self) -> &str {
        match self {
            EnvelopeError::MissingId => "console",
            EnvelopeError::MissingCommand { command_type, .. }
            | EnvelopeError::CommandNotAString { command_type, .. }
            | EnvelopeError::EmptyCommand { command_type, .. } => command_type,
        }
    }
}

impl CommandEnvelope {
    /// Validate a raw push payload into an envelope.
    ///
    /// The server sends either `commandId` or `id`, and either
    /// `commandType` or `type` (defaulting to `console`).
    pub fn parse(data: &Value) -> Result<Self, EnvelopeError> {
        let id = data
            .get("commandId")
            .or_else(|| data.get("id"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(EnvelopeError::MissingId)?
            .to_string();

        let command_type = data
            .get("commandType")
            .or_else(|| data.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("console")
            .to_ascii_lowercase();

        let command = match data.get("command") {
            None | Some(Value::Null) => {
                return Err(EnvelopeError::MissingCommand { id, command_type })
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(EnvelopeError::CommandNotAString { id, command_type }),
        };
        if command.trim().is_empty() {
            return Err(EnvelopeError::EmptyCommand { id, command_type });
        }

        Ok(CommandEnvelope { id, command_type, command })
    }
}

/// Result of one command execution, emitted exactly once per accepted
/// command (including rejections).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(rename = "type")]
    pub command_type: String,
    pub success: bool,
    pub result: Option<CommandPayload>,
}

/// Payload half of a command result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Console {
        stdout: String,
        stderr: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
    Error {
        error_type: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exception: Option<String>,
    },
}

impl CommandResult {
    /// Skeleton handed to a handler: not successful, no payload yet.
    pub fn skeleton(command_type: impl Into<String>) -> Self {
        CommandResult { command_type: command_type.into(), success: false, result: None }
    }

    pub fn error(
        command_type: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CommandResult {
            command_type: command_type.into(),
            success: false,
            result: Some(CommandPayload::Error {
                error_type: error_type.into(),
                message: message.into(),
                exception: None,
            }),
        }
    }

    pub fn error_with_exception(
        command_type: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        exception: impl Into<String>,
    ) -> Self {
        CommandResult {
            command_type: command_type.into(),
            success: false,
            result: Some(CommandPayload::Error {
                error_type: error_type.into(),
                message: message.into(),
                exception: Some(exception.into()),
            }),
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
