// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reserved `system` dispatch slot.
//!
//! The dispatch type exists on the wire but has no semantics yet; every
//! invocation reports an explicit unimplemented error.

use async_trait::async_trait;
use tracing::warn;

use cms_core::{CommandResult, ERROR_TYPE_HANDLER};

use super::CommandHandler;

pub struct SystemHandler;

#[async_trait]
impl CommandHandler for SystemHandler {
    async fn execute(&self, _command: &str, command_id: &str, result: &mut CommandResult) {
        warn!(command_id, "system command received, handler is unimplemented");
        *result = CommandResult::error(&result.command_type, ERROR_TYPE_HANDLER, "unimplemented");
    }
}
