// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn client() -> RequestClient {
    RequestClient::new("https://cms.example.com", Duration::from_secs(15)).unwrap()
}

#[test]
fn base_url_gains_agent_api_path() {
    let client = client();
    assert_eq!(client.endpoint("identify").unwrap().as_str(),
        "https://cms.example.com/api/agent/identify");
}

#[test]
fn trailing_slash_in_server_url_is_tolerated() {
    let client = RequestClient::new("https://cms.example.com/", Duration::from_secs(15)).unwrap();
    assert_eq!(client.endpoint("check-update").unwrap().as_str(),
        "https://cms.example.com/api/agent/check-update");
}

#[parameterized(
    relative = { "download?pkg=1.0.1", "https://cms.example.com/api/agent/download?pkg=1.0.1" },
    relative_with_slash = { "/download?pkg=1.0.1", "https://cms.example.com/api/agent/download?pkg=1.0.1" },
    absolute = { "https://mirror.example.com/pkg.zip", "https://mirror.example.com/pkg.zip" },
)]
fn download_urls_resolve_against_api_base(input: &str, expected: &str) {
    assert_eq!(client().resolve_download_url(input).unwrap().as_str(), expected);
}

#[test]
fn invalid_server_url_is_rejected() {
    assert!(RequestClient::new("not a url", Duration::from_secs(15)).is_err());
}

#[tokio::test]
async fn authenticated_call_without_token_fails_locally() {
    // No server is listening anywhere here: the call must fail before
    // any connection attempt.
    let client = client();
    let err = client.send_hardware_info(&json!({})).await.unwrap_err();
    assert!(matches!(err, RequestError::AuthNotConfigured));

    let err = client.check_update("0.2.0").await.unwrap_err();
    assert!(matches!(err, RequestError::AuthNotConfigured));

    let dir = tempfile::tempdir().unwrap();
    let err = client.download("/download", &dir.path().join("pkg.zip")).await.unwrap_err();
    assert!(matches!(err, RequestError::AuthNotConfigured));
}

#[test]
fn identify_response_parses_all_statuses() {
    let ok: IdentifyResponse = serde_json::from_value(json!({
        "status": "registered", "agentToken": "T1"
    }))
    .unwrap();
    assert_eq!(ok.status, IdentifyStatus::Registered);
    assert_eq!(ok.agent_token.as_deref(), Some("T1"));

    let mfa: IdentifyResponse =
        serde_json::from_value(json!({"status": "mfa_required"})).unwrap();
    assert_eq!(mfa.status, IdentifyStatus::MfaRequired);

    let pos: IdentifyResponse = serde_json::from_value(json!({
        "status": "position_error", "message": "seat taken"
    }))
    .unwrap();
    assert_eq!(pos.status, IdentifyStatus::PositionError);
    assert_eq!(pos.message.as_deref(), Some("seat taken"));

    // Future statuses degrade to Unknown instead of failing the parse
    let odd: IdentifyResponse =
        serde_json::from_value(json!({"status": "carrier_pigeon"})).unwrap();
    assert_eq!(odd.status, IdentifyStatus::Unknown);
}
