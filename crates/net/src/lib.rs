// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cms-net: Server transports for the CMS endpoint agent.
//!
//! Two independent channels to the control plane: authenticated HTTPS
//! request/response ([`RequestClient`]) and the long-lived push channel
//! ([`PushClient`]). Callers consume structured outcomes; raw HTTP and
//! WebSocket details never cross this crate's boundary.

pub mod events;
pub mod http;
pub mod push;

pub use events::{ServerEvent, StatusUpdate};
pub use http::{IdentifyResponse, IdentifyStatus, RequestClient, RequestError};
pub use push::{EventSink, PushClient, PushState, ReconnectPolicy};
