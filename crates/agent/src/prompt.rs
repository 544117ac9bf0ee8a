// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! First-run console prompts: room configuration and MFA codes.
//!
//! The only user-facing surface of the agent. Cancellation (EOF / blank
//! required field after retries) aborts startup.

use std::io::Write;

use cms_core::{Position, RoomAssignment};

/// Capability consumed by the connector and startup path.
pub trait UserPrompter: Send + Sync {
    /// `None` means the operator cancelled.
    fn prompt_room(&self) -> Option<RoomAssignment>;
    /// `None` means the operator cancelled.
    fn prompt_mfa(&self) -> Option<String>;
    fn display_registration_success(&self);
}

/// Interactive stdin/stdout prompter.
pub struct ConsolePrompter;

impl UserPrompter for ConsolePrompter {
    fn prompt_room(&self) -> Option<RoomAssignment> {
        println!("\n--- First-run room configuration ---");
        let room = read_nonempty_line("Room name: ")?;
        let x = read_u32("Position X: ")?;
        let y = read_u32("Position Y: ")?;
        Some(RoomAssignment { room, position: Position { x, y } })
    }

    fn prompt_mfa(&self) -> Option<String> {
        println!("\nThe server requires a verification code to register this host.");
        read_nonempty_line("MFA code: ")
    }

    fn display_registration_success(&self) {
        println!("Registration complete. The agent is now linked to the control plane.");
    }
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None, // EOF
        Ok(_) => Some(line.trim().to_string()),
        Err(_) => None,
    }
}

fn read_nonempty_line(prompt: &str) -> Option<String> {
    for _ in 0..3 {
        let line = read_line(prompt)?;
        if !line.is_empty() {
            return Some(line);
        }
        println!("A value is required.");
    }
    None
}

fn read_u32(prompt: &str) -> Option<u32> {
    for _ in 0..3 {
        let line = read_line(prompt)?;
        match line.parse() {
            Ok(value) => return Some(value),
            Err(_) => println!("Please enter a non-negative whole number."),
        }
    }
    None
}
