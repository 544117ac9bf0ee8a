// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent operational states and the transition legality gate.
//!
//! All state mutation in the runtime goes through a single gated setter
//! (see `cms-agent`); this module owns the enum and the legality rules so
//! they can be tested in isolation.

use serde::{Deserialize, Serialize};

/// Operational states of the agent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Initial state during startup and authentication.
    Starting,
    /// Normal operation: executing commands, reporting status.
    Idle,
    /// Shutting down because an IPC `force_restart` was accepted.
    ForceRestarting,
    /// Update run admitted; prerequisites being checked.
    UpdatingStarting,
    /// Update package download in progress.
    UpdatingDownloading,
    /// Package checksum verification in progress.
    UpdatingVerifying,
    /// Package extraction in progress.
    UpdatingExtracting,
    /// Replacing the installed updater with the packaged one.
    UpdatingReplacingUpdater,
    /// Updater launched; agent is preparing to hand off and exit.
    UpdatingPreparingShutdown,
    /// Normal shutdown in progress.
    ShuttingDown,
    /// All resources released.
    Stopped,
}

impl AgentState {
    /// Whether this state belongs to an in-flight update run.
    pub fn is_updating(self) -> bool {
        matches!(
            self,
            AgentState::UpdatingStarting
                | AgentState::UpdatingDownloading
                | AgentState::UpdatingVerifying
                | AgentState::UpdatingExtracting
                | AgentState::UpdatingReplacingUpdater
                | AgentState::UpdatingPreparingShutdown
        )
    }

    /// Transition legality gate.
    ///
    /// Shutdown states are reachable from anywhere. Once an update run has
    /// progressed past `UPDATING_STARTING`, returning to `IDLE` is rejected;
    /// the only sanctioned rollback is `UPDATING_STARTING -> IDLE`.
    pub fn allows_transition_to(self, next: AgentState) -> bool {
        if matches!(next, AgentState::ShuttingDown | AgentState::Stopped) {
            return true;
        }
        if self.is_updating() && self != AgentState::UpdatingStarting && next == AgentState::Idle {
            return false;
        }
        true
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Starting => "STARTING",
            AgentState::Idle => "IDLE",
            AgentState::ForceRestarting => "FORCE_RESTARTING",
            AgentState::UpdatingStarting => "UPDATING_STARTING",
            AgentState::UpdatingDownloading => "UPDATING_DOWNLOADING",
            AgentState::UpdatingVerifying => "UPDATING_VERIFYING",
            AgentState::UpdatingExtracting => "UPDATING_EXTRACTING",
            AgentState::UpdatingReplacingUpdater => "UPDATING_REPLACING_UPDATER",
            AgentState::UpdatingPreparingShutdown => "UPDATING_PREPARING_SHUTDOWN",
            AgentState::ShuttingDown => "SHUTTING_DOWN",
            AgentState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
