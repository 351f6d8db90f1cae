//! HTTP client for a tbtrack host.
//!
//! Implements [`HostLink`] so a [`SyncSession`](tbtrack_core::sync::SyncSession)
//! can pull from and push to a host over the network, plus the review routes
//! the CLI drives directly.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use tbtrack_core::sync::{
    ApiMessage, CommitRequest, CommitResponse, DataResponse, DeltaResponse, DeviceFilter, HostInfo,
    HostLink, StageRequest, StageResponse, StagedDataResponse, StagedRecord, DEVICE_HEADER,
};
use tbtrack_core::{SyncError, Watermark};

/// Normalizes a user-supplied host address into a base URL.
///
/// A bare `host:port` gets an `http://` scheme and any trailing slash is
/// removed.
pub fn normalize_base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub struct HostClient {
    base_url: String,
    device: String,
    http: reqwest::Client,
}

impl HostClient {
    pub fn new(
        address: &str,
        device: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let base_url = normalize_base_url(address);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::NetworkUnavailable {
                target: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            base_url,
            device: device.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_http_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unreachable(&self, e: reqwest::Error) -> SyncError {
        SyncError::NetworkUnavailable {
            target: self.base_url.clone(),
            reason: e.to_string(),
        }
    }

    /// Maps a host response onto `T` or a [`SyncError`].
    async fn read<T: DeserializeOwned>(
        &self,
        response: Response,
        team: &str,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| self.unreachable(e));
        }

        let message = response
            .json::<ApiMessage>()
            .await
            .ok()
            .and_then(|m| m.message)
            .unwrap_or_else(|| status.to_string());

        Err(match status {
            StatusCode::FORBIDDEN => SyncError::AccessDenied {
                team: team.to_string(),
                device: self.device.clone(),
            },
            StatusCode::CONFLICT => SyncError::StaleReference {
                device: self.device.clone(),
                reason: message,
            },
            _ => SyncError::HostRejected {
                target: self.base_url.clone(),
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, team: &str) -> Result<T, SyncError> {
        let response = self
            .http
            .get(self.build_http_url(path))
            .header(DEVICE_HEADER, &self.device)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.read(response, team).await
    }

    async fn post_json<B, T>(&self, path: &str, team: &str, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.build_http_url(path))
            .header(DEVICE_HEADER, &self.device)
            .json(body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.read(response, team).await
    }

    /// Identifies the host and lists the devices that pushed to it.
    pub async fn host_info(&self) -> Result<HostInfo, SyncError> {
        self.get_json("/api/get_host_info", "").await
    }

    /// Lists records staged on the host, oldest device first.
    pub async fn get_staged(
        &self,
        team: &str,
        device: &DeviceFilter,
    ) -> Result<Vec<StagedRecord>, SyncError> {
        let path = format!(
            "/api/get_staged_data?team={}&device={}",
            urlencoding::encode(team),
            urlencoding::encode(&device.to_string())
        );
        let response: StagedDataResponse = self.get_json(&path, team).await?;
        Ok(response.data)
    }

    pub async fn commit(&self, request: &CommitRequest) -> Result<CommitResponse, SyncError> {
        self.post_json("/api/commit_staged", &request.team, request)
            .await
    }
}

fn data_path(team: &str, since: Option<Watermark>) -> String {
    let mut path = format!("/api/get_all_data?team={}", urlencoding::encode(team));
    if let Some(since) = since {
        path.push_str(&format!("&since={}", since));
    }
    path
}

impl HostLink for HostClient {
    fn target(&self) -> &str {
        &self.base_url
    }

    async fn fetch(
        &self,
        team: &str,
        device: &str,
        since: Option<Watermark>,
    ) -> Result<DeltaResponse, SyncError> {
        let response = self
            .http
            .get(self.build_http_url(&data_path(team, since)))
            .header(DEVICE_HEADER, device)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let body: DataResponse = self.read(response, team).await?;
        Ok(body.delta)
    }

    async fn stage(&self, request: &StageRequest) -> Result<StageResponse, SyncError> {
        self.post_json("/api/stage_incoming", &request.team, request)
            .await
    }
}
