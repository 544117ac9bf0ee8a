// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local IPC between agent processes.
//!
//! One running agent listens on a per-scope endpoint; a second invocation
//! (`--force`) connects, authenticates with the session token, and asks
//! the incumbent to restart. One request per connection.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.

mod client;
mod protocol;
mod server;

pub use client::send_force_command;
pub use protocol::{IpcRequest, IpcResponse, IpcStatus, ProtocolError, MAX_MESSAGE_SIZE};
pub use server::{IpcServer, PLACEHOLDER_TOKEN};
