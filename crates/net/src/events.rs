// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed events on the push channel.
//!
//! Wire format: each text frame is `{"event": <name>, "data": <object>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw frame shape shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Events the server pushes to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Server confirmed the push-channel authentication.
    AuthSuccess,
    /// Server rejected the push-channel authentication.
    AuthFailed { message: String },
    /// A command to execute; payload validated downstream.
    CommandExecute(Value),
    /// Nudge that a newer stable agent version exists.
    NewVersionAvailable { new_stable_version: String },
    /// Anything this agent does not subscribe to.
    Unknown(String),
}

/// Parse one incoming text frame. Non-JSON or frameless text yields `None`.
pub fn parse_server_event(text: &str) -> Option<ServerEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    let event = match frame.event.as_str() {
        "agent:ws_auth_success" => ServerEvent::AuthSuccess,
        "agent:ws_auth_failed" => ServerEvent::AuthFailed {
            message: frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no reason provided")
                .to_string(),
        },
        "command:execute" => ServerEvent::CommandExecute(frame.data),
        "agent:new_version_available" => {
            let new_stable_version = frame
                .data
                .get("new_stable_version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ServerEvent::NewVersionAvailable { new_stable_version }
        }
        other => ServerEvent::Unknown(other.to_string()),
    };
    Some(event)
}

/// Serialize an outgoing frame.
pub fn frame(event: &str, data: Value) -> String {
    // A struct of two serializable fields cannot fail to serialize.
    serde_json::to_string(&Frame { event: event.to_string(), data }).unwrap_or_default()
}

/// Body of an `agent:status_update` emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "cpuUsage")]
    pub cpu_usage: f32,
    #[serde(rename = "ramUsage")]
    pub ram_usage: f32,
    #[serde(rename = "diskUsage")]
    pub disk_usage: f32,
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
