// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{StorageLayout, TokenStore};
use cms_core::{Position, RoomAssignment, SessionToken};

fn open_store(root: &std::path::Path) -> StateStore {
    let layout = StorageLayout::at_root(root.join("CMSAgent")).unwrap();
    let tokens = TokenStore::new(None, layout.token_file());
    StateStore::open(layout, "agent_state.json", tokens).unwrap()
}

#[test]
fn identity_is_generated_once_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let first = {
        let store = open_store(dir.path());
        assert!(store.device_identity().is_none());
        store.ensure_device_identity(Some([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])).unwrap()
    };

    // Re-open: same identity comes back, no regeneration
    let store = open_store(dir.path());
    assert_eq!(store.device_identity(), Some(first.clone()));
    assert_eq!(store.ensure_device_identity(None).unwrap(), first);
}

#[test]
fn room_round_trips_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let room = RoomAssignment { room: "Lab01".into(), position: Position { x: 3, y: 4 } };

    {
        let store = open_store(dir.path());
        assert!(store.room().is_none());
        store.put_room(room.clone()).unwrap();
    }

    let store = open_store(dir.path());
    assert_eq!(store.room(), Some(room));
}

#[test]
fn token_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let id = store.ensure_device_identity(None).unwrap();

    assert!(store.load_token(&id).is_none());
    store.put_token(&id, &SessionToken("T1".into())).unwrap();
    assert_eq!(store.load_token(&id), Some(SessionToken("T1".into())));
}

#[test]
fn corrupt_state_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::at_root(dir.path().join("CMSAgent")).unwrap();
    std::fs::write(layout.state_file("agent_state.json"), b"{not json").unwrap();

    let store = open_store(dir.path());
    assert!(store.device_identity().is_none());
    // The store remains writable
    store.put_version("0.2.0").unwrap();
    assert_eq!(store.recorded_version(), Some("0.2.0".into()));
}

#[test]
fn state_file_is_valid_json_after_every_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store.ensure_device_identity(None).unwrap();
    store
        .put_room(RoomAssignment { room: "A".into(), position: Position { x: 0, y: 0 } })
        .unwrap();
    store.put_version("0.2.0").unwrap();

    let raw =
        std::fs::read_to_string(store.layout().state_file("agent_state.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(value["device_id"].is_string());
    assert_eq!(value["room_config"]["room"], "A");
    assert_eq!(value["version"], "0.2.0");
}
