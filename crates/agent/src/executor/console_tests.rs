// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg(unix)]

use super::*;
use std::time::Instant;

async fn run(handler: &ConsoleHandler, command: &str) -> CommandResult {
    let mut result = CommandResult::skeleton("console");
    handler.execute(command, "C-test", &mut result).await;
    result
}

fn console_payload(result: &CommandResult) -> (String, String, i32) {
    match result.result.clone() {
        Some(CommandPayload::Console { stdout, stderr, exit_code }) => (stdout, stderr, exit_code),
        other => panic!("expected console payload, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_succeeds_with_trimmed_stdout() {
    let handler = ConsoleHandler::new(Duration::from_secs(30));
    let result = run(&handler, "echo hello").await;

    assert!(result.success);
    let (stdout, stderr, exit_code) = console_payload(&result);
    assert_eq!(stdout, "hello");
    assert_eq!(stderr, "");
    assert_eq!(exit_code, 0);
}

#[tokio::test]
async fn nonzero_exit_is_not_success() {
    let handler = ConsoleHandler::new(Duration::from_secs(30));
    let result = run(&handler, "exit 3").await;

    assert!(!result.success);
    let (_, _, exit_code) = console_payload(&result);
    assert_eq!(exit_code, 3);
}

#[tokio::test]
async fn missing_executable_maps_to_127() {
    let handler = ConsoleHandler::new(Duration::from_secs(30));
    // The shell itself reports 127 for an unknown command
    let result = run(&handler, "definitely-not-a-command-on-this-host-1234").await;

    assert!(!result.success);
    let (_, stderr, exit_code) = console_payload(&result);
    assert_eq!(exit_code, 127);
    assert!(!stderr.is_empty());
}

#[tokio::test]
async fn stderr_is_captured() {
    let handler = ConsoleHandler::new(Duration::from_secs(30));
    let result = run(&handler, "echo oops 1>&2; exit 1").await;

    let (stdout, stderr, exit_code) = console_payload(&result);
    assert_eq!(stdout, "");
    assert_eq!(stderr, "oops");
    assert_eq!(exit_code, 1);
}

#[tokio::test]
async fn timeout_yields_124_within_budget() {
    let handler = ConsoleHandler::new(Duration::from_secs(2));
    let started = Instant::now();
    let result = run(&handler, "sleep 10").await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    let (_, stderr, exit_code) = console_payload(&result);
    assert_eq!(exit_code, 124);
    assert!(stderr.contains("timed out"), "stderr: {stderr}");
    assert!(elapsed < Duration::from_secs(7), "took {elapsed:?}");
}
