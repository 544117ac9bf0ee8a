// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::Path;
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("agent_config.json");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn minimal_config_gets_defaults() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"{"server_url": "https://cms.example.com", "agent": {"config_version": 1}}"#,
    );

    let config = AgentConfig::load(&path).unwrap();
    assert_eq!(config.agent.status_report_interval_sec, 30);
    assert_eq!(config.http_client.request_timeout_sec, 15);
    assert_eq!(config.websocket.reconnect_delay_initial_sec, 5);
    assert_eq!(config.websocket.reconnect_attempts_max, None);
    assert_eq!(config.command_executor.max_parallel_commands, 2);
    assert_eq!(config.command_executor.max_queue_size, 20);
    assert_eq!(config.command_executor.default_timeout_sec, 300);
}

#[test]
fn missing_server_url_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), r#"{"server_url": ""}"#);
    assert!(matches!(AgentConfig::load(&path), Err(ConfigError::Invalid(_))));
}

#[test]
fn server_url_without_scheme_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_config(dir.path(), r#"{"server_url": "cms.example.com"}"#);
    assert!(matches!(AgentConfig::load(&path), Err(ConfigError::Invalid(_))));
}

#[test]
fn old_version_is_backed_up_and_migrated_in_place() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"{"server_url": "https://cms.example.com", "agent": {"config_version": 0}}"#,
    );

    let config = AgentConfig::load(&path).unwrap();
    assert_eq!(config.agent.config_version, CURRENT_CONFIG_VERSION);

    // The file itself must now carry the current version
    let reloaded = AgentConfig::load(&path).unwrap();
    assert_eq!(reloaded.agent.config_version, CURRENT_CONFIG_VERSION);

    // A timestamped backup of the original must exist alongside
    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup_"))
        .collect();
    assert_eq!(backups.len(), 1, "expected exactly one backup file");
}

#[test]
fn newer_version_is_accepted_unchanged() {
    let dir = tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"{"server_url": "https://cms.example.com", "agent": {"config_version": 99}}"#,
    );

    let config = AgentConfig::load(&path).unwrap();
    assert_eq!(config.agent.config_version, 99);

    // No backup, since nothing was migrated
    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".backup_"))
        .collect();
    assert!(backups.is_empty());
}
