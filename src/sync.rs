//! Sync adapter
//!
//! Builds the dashboard sync payload from a finalized session and posts it to
//! the configured endpoint. Delivery is fire-and-forget: `deliver` schedules
//! the request on a tokio runtime and returns immediately, and transport
//! failures are only logged.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::runtime::Handle;
use tracing::{info, warn};
use url::Url;

use crate::collaborators::SessionSink;
use crate::config::Settings;
use crate::error::EngineError;
use crate::types::{Category, Session};

/// Treat an explicit `null` like a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Category names outside the known set, and `null`, read as neutral
pub(crate) fn lenient_category<'de, D>(deserializer: D) -> Result<Category, D::Error>
where
    D: Deserializer<'de>,
{
    let category = match Option::<String>::deserialize(deserializer)?.as_deref() {
        Some("academic") => Category::Academic,
        Some("distracting") => Category::Distracting,
        _ => Category::Neutral,
    };
    Ok(category)
}

/// Session half of a sync request
///
/// Timestamps are optional on the wire so that requests missing them can be
/// rejected with a client error rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub effective_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub focus_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub burnout_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject_label: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One visit record on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTabLog {
    #[serde(default, deserialize_with = "null_as_default")]
    pub domain: String,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_spent: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_important: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of `POST /api/sync-session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub session: Option<SyncSession>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tab_logs: Vec<SyncTabLog>,
}

/// Reply of the sync endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SyncRequest {
    /// Build the payload for a finalized session
    ///
    /// Durations are rounded to whole seconds.
    pub fn from_session(session: &Session, user_id: Option<String>) -> Self {
        Self {
            session: Some(SyncSession {
                start_time: Some(session.start_time),
                end_time: session.end_time,
                total_time: session.total_time_seconds.round(),
                effective_time: session.effective_time_seconds.round(),
                focus_score: session.focus_score,
                burnout_score: session.burnout_score,
                subject_label: session.subject_label.clone(),
                user_id,
            }),
            tab_logs: session
                .tab_logs
                .iter()
                .map(|log| SyncTabLog {
                    domain: log.domain.clone(),
                    category: log.category,
                    time_spent: log.time_spent_seconds.round(),
                    is_important: log.is_important,
                    timestamp: Some(log.timestamp),
                })
                .collect(),
        }
    }

    /// Parse a request body
    pub fn from_json(body: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Check the required timestamps, returning the session half with both
    pub fn validate(&self) -> Result<(&SyncSession, DateTime<Utc>, DateTime<Utc>), EngineError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| EngineError::MissingField("session".to_string()))?;
        let start = session
            .start_time
            .ok_or_else(|| EngineError::MissingField("session.start_time".to_string()))?;
        let end = session
            .end_time
            .ok_or_else(|| EngineError::MissingField("session.end_time".to_string()))?;
        Ok((session, start, end))
    }
}

/// Posts finalized sessions to the dashboard
#[derive(Debug, Clone)]
pub struct HttpSyncAdapter {
    client: Client,
    endpoint: Url,
    user_id: Option<String>,
    runtime: Handle,
}

impl HttpSyncAdapter {
    pub fn new(endpoint: Url, user_id: Option<String>, runtime: Handle) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            user_id,
            runtime,
        }
    }

    /// Build an adapter from settings; `None` when no dashboard is configured
    pub fn from_settings(settings: &Settings, runtime: Handle) -> Result<Option<Self>, EngineError> {
        Ok(settings
            .sync_endpoint()?
            .map(|endpoint| Self::new(endpoint, settings.sync_user_id(), runtime)))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Post a request and wait for the reply
    pub async fn post(&self, request: &SyncRequest) -> Result<SyncResponse, EngineError> {
        post_request(&self.client, &self.endpoint, request).await
    }
}

async fn post_request(
    client: &Client,
    endpoint: &Url,
    request: &SyncRequest,
) -> Result<SyncResponse, EngineError> {
    let resp = client
        .post(endpoint.clone())
        .json(request)
        .send()
        .await
        .map_err(|e| EngineError::TransportError(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(EngineError::TransportError(format!(
            "sync endpoint returned HTTP {status}: {text}"
        )));
    }

    resp.json::<SyncResponse>()
        .await
        .map_err(|e| EngineError::TransportError(e.to_string()))
}

impl SessionSink for HttpSyncAdapter {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn deliver(&self, session: &Session) -> Result<(), EngineError> {
        let request = SyncRequest::from_session(session, self.user_id.clone());
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let local_id = session.id;

        self.runtime.spawn(async move {
            match post_request(&client, &endpoint, &request).await {
                Ok(resp) => info!(
                    %local_id,
                    remote_id = resp.session_id.as_deref().unwrap_or(""),
                    "session synced"
                ),
                Err(e) => warn!(%local_id, error = %e, "failed to sync session"),
            }
        });
        Ok(())
    }
}
