// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request/response transport to the control plane.
//!
//! All endpoints live under `<server_url>/api/agent/`. Callers receive a
//! structured [`RequestError`] taxonomy instead of raw HTTP: an
//! authenticated call issued before a token is published fails locally
//! with [`RequestError::AuthNotConfigured`] and never reaches the wire.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use cms_core::{DeviceIdentity, SessionToken, UpdateManifest};

/// Multiplier applied to the default timeout for streaming downloads.
const DOWNLOAD_TIMEOUT_FACTOR: u32 = 4;
/// Download progress is logged at most this often.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unable to connect to the server: {0}")]
    Connection(String),
    #[error("server error {status}")]
    Server { status: u16, body: Option<Value> },
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
    #[error("agent authentication required but not configured")]
    AuthNotConfigured,
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct AuthInfo {
    agent_id: String,
    token: String,
}

/// HTTPS client for the agent API.
pub struct RequestClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    auth: RwLock<Option<AuthInfo>>,
}

/// Response of `/identify` and `/verify-mfa`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifyResponse {
    pub status: IdentifyStatus,
    #[serde(rename = "agentToken")]
    pub agent_token: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyStatus {
    Registered,
    /// MFA verification accepted.
    Success,
    MfaRequired,
    PositionError,
    Error,
    #[serde(other)]
    Unknown,
}

impl RequestClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<RequestClient, RequestError> {
        let trimmed = format!("{}/", server_url.trim_end_matches('/'));
        let base_url = Url::parse(&trimmed)
            .and_then(|u| u.join("api/agent/"))
            .map_err(|e| RequestError::InvalidResponse(format!("invalid server_url: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(format!("CMSAgent/{}", cms_core::AGENT_VERSION))
            .build()
            .map_err(|e| RequestError::Connection(e.to_string()))?;
        info!(base_url = %base_url, timeout_sec = timeout.as_secs(), "request client initialized");
        Ok(RequestClient { http, base_url, timeout, auth: RwLock::new(None) })
    }

    /// Publish credentials for authenticated endpoints.
    pub fn set_auth(&self, agent_id: &DeviceIdentity, token: &SessionToken) {
        *self.auth.write() = Some(AuthInfo {
            agent_id: agent_id.as_str().to_string(),
            token: token.as_str().to_string(),
        });
        debug!(agent_id = %agent_id, "request client auth info set");
    }

    pub async fn identify(
        &self,
        unique_agent_id: &DeviceIdentity,
        position_info: Option<Value>,
        force_renew: bool,
    ) -> Result<IdentifyResponse, RequestError> {
        let mut payload = serde_json::json!({ "unique_agent_id": unique_agent_id.as_str() });
        if force_renew {
            payload["forceRenewToken"] = Value::Bool(true);
        }
        if let Some(position) = position_info {
            payload["positionInfo"] = position;
        }
        info!(agent_id = %unique_agent_id, "identifying agent");
        let body = self.post_json("identify", &payload, false).await?;
        parse_identify(body)
    }

    pub async fn verify_mfa(
        &self,
        unique_agent_id: &DeviceIdentity,
        mfa_code: &str,
    ) -> Result<IdentifyResponse, RequestError> {
        let payload = serde_json::json!({
            "unique_agent_id": unique_agent_id.as_str(),
            "mfaCode": mfa_code,
        });
        info!(agent_id = %unique_agent_id, "verifying MFA code");
        let body = self.post_json("verify-mfa", &payload, false).await?;
        parse_identify(body)
    }

    /// Upload the hardware inventory. Authenticated; any non-2xx fails.
    pub async fn send_hardware_info(&self, hardware: &Value) -> Result<(), RequestError> {
        info!("sending hardware info");
        self.post_json("hardware-info", hardware, true).await?;
        Ok(())
    }

    /// `GET /check-update`: 200 with a manifest, or 204 when current.
    pub async fn check_update(
        &self,
        current_version: &str,
    ) -> Result<Option<UpdateManifest>, RequestError> {
        let auth = self.require_auth()?;
        let url = self.endpoint("check-update")?;
        info!(current_version, "checking for updates");

        let response = self
            .http
            .get(url)
            .query(&[("current_version", current_version)])
            .header("X-Agent-Id", &auth.agent_id)
            .bearer_auth(&auth.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, self.timeout))?;

        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.server_error(response).await);
        }
        let manifest: UpdateManifest = response
            .json()
            .await
            .map_err(|e| RequestError::InvalidResponse(e.to_string()))?;
        Ok(Some(manifest))
    }

    /// Stream a file to `dest`, writing through a sibling temp file that is
    /// atomically renamed on completion. `url` may be relative to the
    /// agent API base or absolute.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, RequestError> {
        let auth = self.require_auth()?;
        let full_url = self.resolve_download_url(url)?;
        let download_timeout = self.timeout * DOWNLOAD_TIMEOUT_FACTOR;

        let dir = dest.parent().ok_or_else(|| {
            RequestError::InvalidResponse("download destination has no parent directory".into())
        })?;
        std::fs::create_dir_all(dir)?;

        info!(url = %full_url, dest = %dest.display(), "starting download");
        let response = self
            .http
            .get(full_url)
            .header("X-Agent-Id", &auth.agent_id)
            .bearer_auth(&auth.token)
            .timeout(download_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, download_timeout))?;

        if !response.status().is_success() {
            return Err(self.server_error(response).await);
        }

        let total = response.content_length();
        // Dropping the temp file on any error path removes the partial.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut downloaded: u64 = 0;
        let mut last_log = Instant::now();

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_transport_error(e, download_timeout))?;
            tmp.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            if last_log.elapsed() > PROGRESS_LOG_INTERVAL {
                match total {
                    Some(total) if total > 0 => {
                        let percent = downloaded as f64 / total as f64 * 100.0;
                        debug!(downloaded, total, "download progress: {percent:.1}%");
                    }
                    _ => debug!(downloaded, "download progress (total size unknown)"),
                }
                last_log = Instant::now();
            }
        }

        tmp.flush()?;
        tmp.persist(dest).map_err(|e| RequestError::Io(e.error))?;
        info!(dest = %dest.display(), bytes = downloaded, "download complete");
        Ok(downloaded)
    }

    /// Upload one error report. Authenticated; 2xx means accepted.
    pub async fn report_error(&self, report: &Value) -> Result<(), RequestError> {
        self.post_json("report-error", report, true).await?;
        Ok(())
    }

    /// Resolve a possibly-relative download URL against the API base.
    fn resolve_download_url(&self, url: &str) -> Result<Url, RequestError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Url::parse(url)
                .map_err(|e| RequestError::InvalidResponse(format!("invalid download url: {e}")));
        }
        self.base_url
            .join(url.trim_start_matches('/'))
            .map_err(|e| RequestError::InvalidResponse(format!("invalid download url: {e}")))
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        self.base_url
            .join(path)
            .map_err(|e| RequestError::InvalidResponse(format!("invalid endpoint: {e}")))
    }

    fn require_auth(&self) -> Result<AuthInfo, RequestError> {
        self.auth.read().clone().ok_or_else(|| {
            error!("authenticated request attempted without credentials");
            RequestError::AuthNotConfigured
        })
    }

    /// POST a JSON body; returns the parsed response body (`None` on 204).
    async fn post_json(
        &self,
        path: &str,
        payload: &Value,
        authenticated: bool,
    ) -> Result<Option<Value>, RequestError> {
        let url = self.endpoint(path)?;
        let mut request = self.http.post(url).json(payload).timeout(self.timeout);
        if authenticated {
            let auth = self.require_auth()?;
            request = request.header("X-Agent-Id", &auth.agent_id).bearer_auth(&auth.token);
        }

        let response =
            request.send().await.map_err(|e| self.map_transport_error(e, self.timeout))?;
        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.server_error(response).await);
        }
        match response.json::<Value>().await {
            Ok(body) => Ok(Some(body)),
            Err(e) => Err(RequestError::InvalidResponse(format!(
                "invalid JSON despite success status: {e}"
            ))),
        }
    }

    fn map_transport_error(&self, e: reqwest::Error, timeout: Duration) -> RequestError {
        if e.is_timeout() {
            warn!(?timeout, "request timed out");
            return RequestError::Timeout(timeout);
        }
        if e.is_connect() {
            let host = self.base_url.host_str().unwrap_or("server");
            warn!(%e, "connection error");
            return RequestError::Connection(format!("unable to connect to {host}: {e}"));
        }
        RequestError::Connection(e.to_string())
    }

    /// Non-2xx: parse the body when it is JSON so callers can inspect it.
    async fn server_error(&self, response: reqwest::Response) -> RequestError {
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.ok();
        warn!(status, has_body = body.is_some(), "server returned error status");
        RequestError::Server { status, body }
    }
}

fn parse_identify(body: Option<Value>) -> Result<IdentifyResponse, RequestError> {
    let body = body
        .ok_or_else(|| RequestError::InvalidResponse("empty identification response".into()))?;
    serde_json::from_value(body).map_err(|e| RequestError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
