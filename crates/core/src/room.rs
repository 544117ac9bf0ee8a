// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room assignment: where this host sits in the managed fleet.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// Obtained from the operator on first run; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssignment {
    pub room: String,
    pub position: Position,
}

impl RoomAssignment {
    /// The `positionInfo` body sent with `/identify`.
    pub fn position_info(&self) -> serde_json::Value {
        serde_json::json!({
            "roomName": self.room,
            "posX": self.position.x,
            "posY": self.position.y,
        })
    }
}
