// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cms_net::{ReconnectPolicy, StatusUpdate};
use cms_store::{StorageLayout, TokenStore};

struct FakeInspector;

impl SystemInspector for FakeInspector {
    fn usage_sample(&self) -> StatusUpdate {
        StatusUpdate { cpu_usage: 1.0, ram_usage: 2.0, disk_usage: 3.0 }
    }

    fn hardware_inventory(&self) -> Value {
        serde_json::json!({"hostname": "test"})
    }
}

struct NoPrompter;

impl UserPrompter for NoPrompter {
    fn prompt_room(&self) -> Option<RoomAssignment> {
        None
    }

    fn prompt_mfa(&self) -> Option<String> {
        None
    }

    fn display_registration_success(&self) {}
}

struct NullSink;

impl EventSink for NullSink {
    fn on_command(&self, _payload: Value) {}
    fn on_new_version(&self, _version: String) {}
}

fn connector(dir: &std::path::Path) -> Arc<ServerConnector> {
    let layout = StorageLayout::at_root(dir.join("CMSAgent")).unwrap();
    let tokens = TokenStore::new(None, layout.token_file());
    let store = Arc::new(StateStore::open(layout, "agent_state.json", tokens).unwrap());
    let device_id = store.ensure_device_identity(None).unwrap();

    // Nothing listens on this address; every call fails fast.
    let http =
        Arc::new(RequestClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
    let push = Arc::new(PushClient::new("http://127.0.0.1:9", ReconnectPolicy::default()).unwrap());

    Arc::new(ServerConnector::new(
        store,
        http,
        push,
        Arc::new(FakeInspector),
        Arc::new(NoPrompter),
        Arc::new(NullSink),
        device_id,
    ))
}

#[tokio::test]
async fn failed_upload_spools_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let connector = connector(dir.path());

    connector
        .report_error("UpdateDownloadFailed", "network unplugged", None, Some("stack".into()))
        .await;

    let spool = connector.store.error_spool();
    let files = spool.list();
    assert_eq!(files.len(), 1, "report must be spooled when upload fails");
    let body = spool.read(&files[0]).unwrap();
    assert_eq!(body["error_type"], "UpdateDownloadFailed");
    assert_eq!(body["error_details"]["stack_trace"], "stack");
}

#[tokio::test]
async fn empty_spool_drains_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let connector = connector(dir.path());
    assert_eq!(connector.drain_error_spool().await, (0, 0));
}

#[tokio::test]
async fn status_send_without_push_session_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let connector = connector(dir.path());
    // Push channel never authenticated: the sample is dropped, no panic.
    connector.send_status_once();
}

#[tokio::test]
async fn spool_drain_wait_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let connector = connector(dir.path());
    connector.spawn_spool_drain();
    connector.wait_for_spool_drain(Duration::from_secs(2)).await;
}
