// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn parses_auth_events() {
    assert_eq!(
        parse_server_event(r#"{"event":"agent:ws_auth_success","data":{}}"#),
        Some(ServerEvent::AuthSuccess)
    );
    assert_eq!(
        parse_server_event(r#"{"event":"agent:ws_auth_failed","data":{"message":"bad token"}}"#),
        Some(ServerEvent::AuthFailed { message: "bad token".into() })
    );
    // Missing message gets a default
    assert_eq!(
        parse_server_event(r#"{"event":"agent:ws_auth_failed"}"#),
        Some(ServerEvent::AuthFailed { message: "no reason provided".into() })
    );
}

#[test]
fn parses_command_execute_with_payload() {
    let event =
        parse_server_event(r#"{"event":"command:execute","data":{"id":"C1","command":"ls"}}"#)
            .unwrap();
    match event {
        ServerEvent::CommandExecute(data) => {
            assert_eq!(data["id"], "C1");
            assert_eq!(data["command"], "ls");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn parses_new_version() {
    assert_eq!(
        parse_server_event(
            r#"{"event":"agent:new_version_available","data":{"new_stable_version":"1.0.1"}}"#
        ),
        Some(ServerEvent::NewVersionAvailable { new_stable_version: "1.0.1".into() })
    );
}

#[test]
fn unknown_and_malformed_frames() {
    assert_eq!(
        parse_server_event(r#"{"event":"weather:update","data":{}}"#),
        Some(ServerEvent::Unknown("weather:update".into()))
    );
    assert_eq!(parse_server_event("not json"), None);
}

#[test]
fn outgoing_frame_shape() {
    let text = frame("agent:status_update", json!({"cpuUsage": 1.5}));
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["event"], "agent:status_update");
    assert_eq!(value["data"]["cpuUsage"], 1.5);
}

#[test]
fn status_update_uses_camel_case() {
    let wire = serde_json::to_value(StatusUpdate {
        cpu_usage: 10.0,
        ram_usage: 20.0,
        disk_usage: 30.0,
    })
    .unwrap();
    assert_eq!(wire["cpuUsage"], 10.0);
    assert_eq!(wire["ramUsage"], 20.0);
    assert_eq!(wire["diskUsage"], 30.0);
}
