// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: schema, defaults, and version migration.
//!
//! The configuration lives in `agent_config.json` under the storage root.
//! Files older than [`CURRENT_CONFIG_VERSION`] are backed up and migrated
//! in place; migration refuses to proceed when the backup cannot be
//! written. A file from a *newer* agent is accepted with a warning.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Migration target for `agent.config_version`.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("configuration backup failed, refusing to migrate: {0}")]
    BackupFailed(std::io::Error),
    #[error("failed to write migrated config: {0}")]
    WriteFailed(std::io::Error),
}

/// Full configuration consumed by the agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub http_client: HttpClientSection,
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub command_executor: CommandExecutorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub app_name: String,
    pub status_report_interval_sec: u64,
    pub state_filename: String,
    pub config_version: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        AgentSection {
            app_name: "CMSAgent".to_string(),
            status_report_interval_sec: 30,
            state_filename: "agent_state.json".to_string(),
            // Absent version reads as 0 so stale files are migrated.
            config_version: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientSection {
    pub request_timeout_sec: u64,
}

impl Default for HttpClientSection {
    fn default() -> Self {
        HttpClientSection { request_timeout_sec: 15 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSection {
    pub reconnect_delay_initial_sec: u64,
    pub reconnect_delay_max_sec: u64,
    /// `None` means reconnect forever.
    pub reconnect_attempts_max: Option<u32>,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        WebSocketSection {
            reconnect_delay_initial_sec: 5,
            reconnect_delay_max_sec: 60,
            reconnect_attempts_max: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandExecutorSection {
    pub max_parallel_commands: usize,
    pub max_queue_size: usize,
    pub default_timeout_sec: u64,
    pub console_encoding: String,
}

impl Default for CommandExecutorSection {
    fn default() -> Self {
        CommandExecutorSection {
            max_parallel_commands: 2,
            max_queue_size: 20,
            default_timeout_sec: 300,
            console_encoding: default_console_encoding().to_string(),
        }
    }
}

#[cfg(windows)]
fn default_console_encoding() -> &'static str {
    "cp1252"
}

#[cfg(not(windows))]
fn default_console_encoding() -> &'static str {
    "utf-8"
}

impl AgentConfig {
    /// Load configuration from `path`, migrating older versions in place.
    pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        let mut config: AgentConfig = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: display, source })?;
        config.validate()?;

        let loaded_version = config.agent.config_version;
        if loaded_version < CURRENT_CONFIG_VERSION {
            info!(
                from = loaded_version,
                to = CURRENT_CONFIG_VERSION,
                "configuration version mismatch, migrating"
            );
            backup_config(path).map_err(ConfigError::BackupFailed)?;
            config.agent.config_version = CURRENT_CONFIG_VERSION;
            let migrated = serde_json::to_string_pretty(&config)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            std::fs::write(path, migrated).map_err(ConfigError::WriteFailed)?;
            info!(version = CURRENT_CONFIG_VERSION, "configuration migrated in place");
        } else if loaded_version > CURRENT_CONFIG_VERSION {
            warn!(
                found = loaded_version,
                supported = CURRENT_CONFIG_VERSION,
                "configuration file is from a newer agent; continuing"
            );
        }

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is required".to_string()));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "server_url must include a scheme (http:// or https://): {}",
                self.server_url
            )));
        }
        Ok(())
    }
}

/// Copy the config to `<name>.backup_<timestamp>` next to the original.
fn backup_config(path: &Path) -> Result<(), std::io::Error> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let backup = path.with_file_name(format!("{name}.backup_{stamp}"));
    std::fs::copy(path, &backup)?;
    info!(backup = %backup.display(), "configuration backed up");
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
