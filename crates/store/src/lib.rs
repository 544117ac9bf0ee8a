// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cms-store: Persistent local state for the CMS endpoint agent.
//!
//! Everything the agent remembers across restarts lives under one storage
//! root: the identity/room state file, the fallback token file, the error
//! spool, logs, and the transient updates directory.

mod layout;
mod spool;
mod state_store;
mod token;

pub use layout::StorageLayout;
pub use spool::ErrorSpool;
pub use state_store::{StateStore, StoreError};
pub use token::{CredentialStore, KeyringStore, TokenStore};
