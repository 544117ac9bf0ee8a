// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn parse_accepts_both_id_spellings() {
    let a = CommandEnvelope::parse(&json!({"commandId": "C1", "command": "echo hi"})).unwrap();
    let b = CommandEnvelope::parse(&json!({"id": "C1", "command": "echo hi"})).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.command_type, "console");
}

#[test]
fn parse_lowercases_type() {
    let env =
        CommandEnvelope::parse(&json!({"id": "C1", "commandType": "Console", "command": "ls"}))
            .unwrap();
    assert_eq!(env.command_type, "console");
}

#[test]
fn parse_rejects_missing_id() {
    let err = CommandEnvelope::parse(&json!({"command": "ls"})).unwrap_err();
    assert_eq!(err, EnvelopeError::MissingId);
    assert!(err.id().is_none());
}

#[test]
fn parse_rejects_missing_command_but_keeps_id() {
    let err = CommandEnvelope::parse(&json!({"id": "C9", "type": "system"})).unwrap_err();
    assert_eq!(err.id(), Some("C9"));
    assert_eq!(err.command_type(), "system");
    assert!(matches!(err, EnvelopeError::MissingCommand { .. }));
}

#[test]
fn parse_rejects_non_string_and_blank_commands() {
    let err = CommandEnvelope::parse(&json!({"id": "C1", "command": 42})).unwrap_err();
    assert!(matches!(err, EnvelopeError::CommandNotAString { .. }));

    let err = CommandEnvelope::parse(&json!({"id": "C1", "command": "   "})).unwrap_err();
    assert!(matches!(err, EnvelopeError::EmptyCommand { .. }));
}

#[test]
fn console_payload_uses_camel_case_exit_code() {
    let result = CommandResult {
        command_type: "console".into(),
        success: true,
        result: Some(CommandPayload::Console {
            stdout: "hello".into(),
            stderr: String::new(),
            exit_code: 0,
        }),
    };
    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["type"], "console");
    assert_eq!(wire["result"]["exitCode"], 0);
}

#[test]
fn error_payload_omits_absent_exception() {
    let wire =
        serde_json::to_value(CommandResult::error("console", ERROR_TYPE_QUEUE, "queue full"))
            .unwrap();
    assert_eq!(wire["result"]["error_type"], "QueueError");
    assert!(wire["result"].get("exception").is_none());

    let wire = serde_json::to_value(CommandResult::error_with_exception(
        "console",
        ERROR_TYPE_HANDLER,
        "boom",
        "JoinError",
    ))
    .unwrap();
    assert_eq!(wire["result"]["exception"], "JoinError");
}
