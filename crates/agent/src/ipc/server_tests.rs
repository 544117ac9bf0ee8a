// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg(unix)]

use super::*;
use crate::ipc::send_force_command;
use cms_core::AgentState;

async fn started_server(dir: &tempfile::TempDir) -> (Arc<AgentHandle>, IpcServer) {
    let agent = AgentHandle::new();
    let server = IpcServer::new(dir.path().join("ipc.sock"), Arc::clone(&agent));
    server.start().await.unwrap();
    (agent, server)
}

#[tokio::test]
async fn wrong_token_is_rejected_without_state_change() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, server) = started_server(&dir).await;
    server.update_token("T1");

    let response =
        send_force_command(server.socket_path(), vec![], "WRONG").await;
    assert_eq!(response.status, IpcStatus::InvalidToken);

    // No transition occurred
    assert_eq!(agent.state(), AgentState::Starting);
    assert!(!agent.shutdown_token().is_cancelled());
    server.stop();
    server.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn placeholder_token_rejects_ordinary_callers_pre_auth() {
    let dir = tempfile::tempdir().unwrap();
    let (_agent, server) = started_server(&dir).await;

    // Before authentication the server holds the placeholder; a caller
    // with a real-looking token is still rejected.
    let response = send_force_command(server.socket_path(), vec![], "T1").await;
    assert_eq!(response.status, IpcStatus::InvalidToken);
    server.stop();
    server.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn valid_force_restart_acknowledges_then_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, server) = started_server(&dir).await;
    server.update_token("T1");

    let response = send_force_command(
        server.socket_path(),
        vec!["--debug".to_string()],
        "T1",
    )
    .await;
    assert_eq!(response.status, IpcStatus::Acknowledged);

    // The restart request lands shortly after the reply is flushed.
    tokio::time::timeout(Duration::from_secs(2), agent.shutdown_token().cancelled())
        .await
        .unwrap();
    assert_eq!(agent.state(), AgentState::ForceRestarting);
    server.stop();
    server.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn busy_updating_rejects_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, server) = started_server(&dir).await;
    server.update_token("T1");
    agent.set_state(AgentState::Idle);
    agent.set_state(AgentState::UpdatingStarting);
    agent.set_state(AgentState::UpdatingDownloading);

    let response = send_force_command(server.socket_path(), vec![], "T1").await;
    assert_eq!(response.status, IpcStatus::BusyUpdating);
    assert_eq!(agent.state(), AgentState::UpdatingDownloading);
    server.stop();
    server.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_agent, server) = started_server(&dir).await;
    server.update_token("T1");

    // Hand-roll a request with a different command
    let mut stream = tokio::net::UnixStream::connect(server.socket_path()).await.unwrap();
    let request = IpcRequest { command: "make_coffee".into(), token: "T1".into(), new_args: vec![] };
    write_message(&mut stream, &request, Duration::from_secs(2)).await.unwrap();
    let response: IpcResponse = read_message(&mut stream, Duration::from_secs(2)).await.unwrap();
    assert_eq!(response.status, IpcStatus::UnknownCommand);
    server.stop();
    server.join(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn missing_endpoint_reports_agent_not_running() {
    let dir = tempfile::tempdir().unwrap();
    let response =
        send_force_command(&dir.path().join("nobody-home.sock"), vec![], "T1").await;
    assert_eq!(response.status, IpcStatus::AgentNotRunning);
}

#[tokio::test]
async fn token_sink_updates_validation_token() {
    use crate::token::{SessionTokenHandle, TokenSink};

    let dir = tempfile::tempdir().unwrap();
    let (_agent, server) = started_server(&dir).await;
    let server = Arc::new(server);

    let tokens = SessionTokenHandle::new();
    tokens.register(Arc::clone(&server) as Arc<dyn TokenSink>);
    tokens.publish(cms_core::SessionToken("T9".into()));

    let response = send_force_command(server.socket_path(), vec![], "T9").await;
    assert_eq!(response.status, IpcStatus::Acknowledged);
    server.stop();
    server.join(Duration::from_secs(2)).await;
}
