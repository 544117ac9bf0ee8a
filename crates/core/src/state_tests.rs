// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::AgentState;
use proptest::prelude::*;
use yare::parameterized;

const ALL_STATES: [AgentState; 11] = [
    AgentState::Starting,
    AgentState::Idle,
    AgentState::ForceRestarting,
    AgentState::UpdatingStarting,
    AgentState::UpdatingDownloading,
    AgentState::UpdatingVerifying,
    AgentState::UpdatingExtracting,
    AgentState::UpdatingReplacingUpdater,
    AgentState::UpdatingPreparingShutdown,
    AgentState::ShuttingDown,
    AgentState::Stopped,
];

#[test]
fn shutdown_reachable_from_everywhere() {
    for from in ALL_STATES {
        assert!(from.allows_transition_to(AgentState::ShuttingDown), "{from} -> SHUTTING_DOWN");
        assert!(from.allows_transition_to(AgentState::Stopped), "{from} -> STOPPED");
    }
}

#[test]
fn updating_starting_may_roll_back_to_idle() {
    assert!(AgentState::UpdatingStarting.allows_transition_to(AgentState::Idle));
}

#[parameterized(
    downloading = { AgentState::UpdatingDownloading },
    verifying = { AgentState::UpdatingVerifying },
    extracting = { AgentState::UpdatingExtracting },
    replacing = { AgentState::UpdatingReplacingUpdater },
    preparing = { AgentState::UpdatingPreparingShutdown },
)]
fn late_update_states_cannot_return_to_idle(from: AgentState) {
    assert!(!from.allows_transition_to(AgentState::Idle), "{from} -> IDLE must be rejected");
}

#[test]
fn idle_enters_update_and_force_restart() {
    assert!(AgentState::Idle.allows_transition_to(AgentState::UpdatingStarting));
    assert!(AgentState::Idle.allows_transition_to(AgentState::ForceRestarting));
}

#[test]
fn display_matches_wire_names() {
    assert_eq!(AgentState::UpdatingPreparingShutdown.to_string(), "UPDATING_PREPARING_SHUTDOWN");
    assert_eq!(AgentState::Idle.to_string(), "IDLE");
}

fn arb_state() -> impl Strategy<Value = AgentState> {
    prop::sample::select(ALL_STATES.to_vec())
}

proptest! {
    /// For any request sequence, applying only gated transitions never
    /// yields a state that re-entered IDLE from a late update state.
    #[test]
    fn gated_walk_never_leaves_update_via_idle(requests in prop::collection::vec(arb_state(), 1..40)) {
        let mut current = AgentState::Starting;
        for next in requests {
            let was_late_update = current.is_updating() && current != AgentState::UpdatingStarting;
            if current.allows_transition_to(next) {
                if was_late_update && next == AgentState::Idle {
                    panic!("gate admitted {current} -> IDLE");
                }
                current = next;
            }
        }
    }
}
