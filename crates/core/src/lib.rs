// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cms-core: Domain types for the CMS endpoint agent.

pub mod command;
pub mod config;
pub mod identity;
pub mod manifest;
pub mod report;
pub mod room;
pub mod state;

pub use command::{
    CommandEnvelope, CommandPayload, CommandResult, EnvelopeError, ERROR_TYPE_EXECUTOR,
    ERROR_TYPE_HANDLER, ERROR_TYPE_INPUT, ERROR_TYPE_QUEUE,
};
pub use config::{AgentConfig, ConfigError, CURRENT_CONFIG_VERSION};
pub use identity::DeviceIdentity;
pub use manifest::UpdateManifest;
pub use report::ErrorReport;
pub use room::{Position, RoomAssignment};
pub use state::AgentState;

/// Version of the running agent, reported to the server and compared
/// against update manifests.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Opaque bearer credential issued by the server for one
/// (device, registration) pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    /// Tokens are secrets; display is redacted for logging.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<token:{} bytes>", self.0.len())
    }
}
