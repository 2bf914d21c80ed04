//! Control-plane client: snapshot, refresh, and next-track endpoints.
//!
//! Services depend on the [`ControlPlane`] trait rather than a concrete
//! HTTP client, enabling testing with recorded implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::EndpointContext;
use crate::error::{ApiError, ApiResult};
use crate::track::{ExplorerSnapshot, NextTrackProposal, Track};

/// Stages of the recovery ladder, sent to the refresh endpoint.
pub mod refresh_stage {
    /// Ask the server to rebroadcast state to the bound fingerprint.
    pub const REBROADCAST: &str = "rebroadcast";
    /// Ask the server to rebind the session to the same fingerprint.
    pub const REBIND: &str = "rebind";
}

/// Body of a `/refresh-sse` request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Fingerprint to refresh, when bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Session id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Which ladder stage is asking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Response of a `/refresh-sse` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Whether the server honored the refresh.
    #[serde(default)]
    pub ok: bool,

    /// Why the refresh was declined (e.g. `inactive`).
    #[serde(default)]
    pub reason: Option<String>,

    /// Fingerprint the server refreshed.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Server-side current track at refresh time.
    #[serde(default)]
    pub current_track: Option<Track>,

    /// Server-side next-track proposal at refresh time.
    #[serde(default)]
    pub next_track: Option<NextTrackProposal>,

    /// Explorer payload, when the server includes one.
    #[serde(default)]
    pub explorer_data: Option<ExplorerSnapshot>,

    /// Connected client count, informational.
    #[serde(default)]
    pub client_count: Option<u32>,
}

/// Body of a `/next-track` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTrackRequest {
    /// Identifier of the selected track.
    pub track_md5: String,

    /// Direction the selection came from, when picked off the deck.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    /// Selection source; always `"user"` for manual overrides.
    pub source: String,

    /// Fingerprint of this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Session id of this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The three request/response endpoints the core calls.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetches a fresh explorer snapshot for the given track.
    async fn fetch_snapshot(&self, current_track_id: &str) -> ApiResult<ExplorerSnapshot>;

    /// Runs a recovery-ladder refresh.
    async fn refresh(&self, request: RefreshRequest) -> ApiResult<RefreshResponse>;

    /// Submits a manual next-track selection.
    async fn submit_next_track(&self, request: NextTrackRequest) -> ApiResult<()>;
}

/// HTTP implementation of the control plane.
pub struct HttpControlPlane {
    client: reqwest::Client,
    ctx: EndpointContext,
}

impl HttpControlPlane {
    /// Creates a control plane over the given client and endpoints.
    #[must_use]
    pub fn new(client: reqwest::Client, ctx: EndpointContext) -> Self {
        Self { client, ctx }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn fetch_snapshot(&self, current_track_id: &str) -> ApiResult<ExplorerSnapshot> {
        let response = self
            .client
            .post(self.ctx.snapshot_url())
            .json(&json!({ "currentTrackId": current_track_id }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn refresh(&self, request: RefreshRequest) -> ApiResult<RefreshResponse> {
        let response = self
            .client
            .post(self.ctx.refresh_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn submit_next_track(&self, request: NextTrackRequest) -> ApiResult<()> {
        let response = self
            .client
            .post(self.ctx.next_track_url())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(())
    }
}
