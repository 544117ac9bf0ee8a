// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console command handler: runs the payload through the host shell and
//! captures output.
//!
//! Exit code conventions for local failures mirror the usual shell ones:
//! 124 timeout, 127 not found, 126 permission denied, errno otherwise.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use cms_core::{CommandPayload, CommandResult};

use super::CommandHandler;

pub struct ConsoleHandler {
    command_timeout: Duration,
}

impl ConsoleHandler {
    pub fn new(command_timeout: Duration) -> Self {
        ConsoleHandler { command_timeout }
    }

    fn shell_command(command: &str) -> tokio::process::Command {
        #[cfg(windows)]
        {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/C").arg(command);
            // CREATE_NO_WINDOW: the agent is a background service
            cmd.creation_flags(0x08000000);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl CommandHandler for ConsoleHandler {
    async fn execute(&self, command: &str, command_id: &str, result: &mut CommandResult) {
        result.success = false;

        let mut process = Self::shell_command(command);
        process
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                let (exit_code, stderr) = match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        let name = command.split_whitespace().next().unwrap_or("N/A");
                        (127, format!("Error: Command not found: '{name}'. Ensure it's installed and in the system PATH."))
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        (126, format!("Error: Permission denied to execute command: {e}"))
                    }
                    _ => (
                        e.raw_os_error().unwrap_or(1),
                        format!("Operating system error while executing command: {e}"),
                    ),
                };
                error!(command_id, exit_code, "spawn failed: {stderr}");
                result.result = Some(CommandPayload::Console {
                    stdout: String::new(),
                    stderr,
                    exit_code,
                });
                return;
            }
        };

        // On timeout the dropped child is killed (kill_on_drop).
        match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                result.success = exit_code == 0;
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if !stderr.is_empty() && !result.success {
                    warn!(command_id, "command stderr: {stderr}");
                }
                info!(command_id, exit_code, success = result.success, "command executed");
                result.result = Some(CommandPayload::Console {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr,
                    exit_code,
                });
            }
            Ok(Err(e)) => {
                error!(command_id, error = %e, "failed waiting for command");
                result.result = Some(CommandPayload::Console {
                    stdout: String::new(),
                    stderr: format!("Operating system error while executing command: {e}"),
                    exit_code: e.raw_os_error().unwrap_or(1),
                });
            }
            Err(_) => {
                error!(
                    command_id,
                    timeout_sec = self.command_timeout.as_secs(),
                    "command timed out"
                );
                result.result = Some(CommandPayload::Console {
                    stdout: String::new(),
                    stderr: format!(
                        "Error: Command timed out after {} seconds.",
                        self.command_timeout.as_secs()
                    ),
                    exit_code: 124,
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
