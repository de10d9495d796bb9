//! Webhook endpoint handler.
//!
//! Accepts the manager's event notifications, in this order: rate limit,
//! authenticate, parse, dedupe, route. Grabs schedule a delayed import
//! check; imports cancel it; failures trigger an immediate reconcile. The
//! handler never leaks internal error detail to the caller.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scheduler::Trigger;
use crate::types::{DownloadId, EpisodeId, Fingerprint};

use super::auth::{authenticate, SECRET_HEADER, SIGNATURE_HEADER};
use super::AppState;

/// Window in which identical deliveries are collapsed.
const DEDUPE_WINDOW: Duration = Duration::from_secs(30);

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Too many requests from this address.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Authentication failed; no detail is revealed to the caller.
    #[error("authentication failed")]
    Unauthorized,

    /// Body was not valid JSON.
    #[error("invalid JSON body")]
    InvalidJson,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"),
            WebhookError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication failed"),
            WebhookError::InvalidJson => (StatusCode::BAD_REQUEST, "invalid JSON body"),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

/// Episode reference inside a webhook payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRef {
    pub id: EpisodeId,
}

/// The manager's webhook payload, reduced to the fields this service routes
/// on. Everything else is tolerated and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, alias = "download_id")]
    pub download_id: Option<DownloadId>,
    #[serde(default)]
    pub episodes: Vec<EpisodeRef>,
    /// Some senders put a single episode object here instead of a list.
    #[serde(default)]
    pub episode: Option<EpisodeRef>,
    /// Best-effort delivery identifier, when the sender includes one.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WebhookPayload {
    fn episode_ids(&self) -> Vec<EpisodeId> {
        let mut ids: Vec<EpisodeId> = self.episodes.iter().map(|e| e.id).collect();
        if let Some(single) = &self.episode {
            if !ids.contains(&single.id) {
                ids.push(single.id);
            }
        }
        ids
    }

    /// Key identifying this logical delivery for the dedupe window.
    fn dedupe_key(&self, event_type: &str) -> String {
        format!(
            "{}:{}:{}",
            event_type,
            self.download_id
                .as_ref()
                .map(DownloadId::as_str)
                .unwrap_or(""),
            self.id
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        )
    }
}

/// Collapses identical deliveries received within [`DEDUPE_WINDOW`].
pub struct DeliveryDeduper {
    seen: Mutex<HashMap<String, Instant>>,
}

impl DeliveryDeduper {
    pub fn new() -> Self {
        DeliveryDeduper {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when the key was already admitted inside the window.
    pub fn admit(&self, key: String) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().expect("deduper poisoned");
        seen.retain(|_, at| now.duration_since(*at) < DEDUPE_WINDOW);

        match seen.get(&key) {
            Some(_) => false,
            None => {
                seen.insert(key, now);
                true
            }
        }
    }
}

impl Default for DeliveryDeduper {
    fn default() -> Self {
        Self::new()
    }
}

/// `POST /webhook/sonarr`.
pub async fn webhook_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    if !state.rate_limiter().admit(remote.ip()) {
        state.metrics().record_rate_limited();
        warn!(remote = %remote.ip(), "rate limit exceeded");
        return Err(WebhookError::RateLimited);
    }

    // Authenticate before parsing: malicious bodies should cost nothing.
    let secret_header = header_str(&headers, SECRET_HEADER);
    let signature_header = header_str(&headers, SIGNATURE_HEADER);
    if !authenticate(
        state.secret(),
        secret_header.as_deref(),
        signature_header.as_deref(),
        &body,
    ) {
        state.metrics().record_auth_failure();
        warn!(remote = %remote.ip(), "webhook authentication failed");
        return Err(WebhookError::Unauthorized);
    }

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|_| WebhookError::InvalidJson)?;
    let event_type = payload.event_type.clone().unwrap_or_else(|| "Unknown".to_string());
    state.metrics().record_webhook_event(&event_type);

    if !state.deduper().admit(payload.dedupe_key(&event_type)) {
        debug!(event = %event_type, "duplicate delivery collapsed");
        return Ok(Json(json!({"status": "duplicate"})));
    }

    info!(
        remote = %remote.ip(),
        event = %event_type,
        download = payload.download_id.as_ref().map(DownloadId::as_str),
        episodes = payload.episode_ids().len(),
        "webhook received"
    );

    let response = match event_type.as_str() {
        "Test" => json!({
            "status": "success",
            "message": "webhook test received, authentication working",
        }),
        "Grab" => handle_grab(&state, &payload),
        "Download" | "Import" => handle_import(&state, &payload),
        "ImportFailure" | "DownloadFailure" | "ManualInteractionRequired" => {
            handle_failure(&state, &payload)
        }
        "HealthIssue" => {
            warn!(
                level = payload.level.as_deref().unwrap_or("unknown"),
                message = payload.message.as_deref().unwrap_or(""),
                "manager reported a health issue"
            );
            json!({"status": "acknowledged"})
        }
        other => {
            debug!(event = other, "unhandled webhook event");
            json!({"status": "ignored", "event_type": other})
        }
    };

    Ok(Json(response))
}

/// `GET /webhook/sonarr`: describes the endpoint for operators.
pub async fn webhook_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "import-warden",
        "webhook_path": "/webhook/sonarr",
        "supported_events": [
            "Test", "Grab", "Download", "Import",
            "ImportFailure", "DownloadFailure", "ManualInteractionRequired", "HealthIssue",
        ],
        "supported_methods": ["POST"],
        "content_type": "application/json",
        "authentication_required": state.secret().is_some(),
    }))
}

/// A grab: schedule one delayed import check per episode.
fn handle_grab(state: &AppState, payload: &WebhookPayload) -> serde_json::Value {
    let Some(download_id) = payload.download_id.clone() else {
        debug!("grab without download ID, nothing to schedule");
        return json!({"status": "ignored", "reason": "no download id"});
    };

    let episodes = payload.episode_ids();
    for episode in &episodes {
        let fingerprint = Fingerprint::new(*episode, download_id.clone());
        let outcome = state.scheduler().schedule(
            fingerprint,
            state.import_check_delay(),
            Trigger::PostGrabCheck,
        );
        debug!(episode = %episode, download = %download_id, ?outcome, "scheduled post-grab check");
    }

    json!({"status": "success", "episodes_scheduled": episodes.len()})
}

/// A successful import: cancel the pending check, drop stale caches.
fn handle_import(state: &AppState, payload: &WebhookPayload) -> serde_json::Value {
    let mut cancelled = 0usize;
    for episode in payload.episode_ids() {
        if let Some(download_id) = payload.download_id.clone() {
            let fingerprint = Fingerprint::new(episode, download_id);
            if state.scheduler().cancel(&fingerprint) {
                cancelled += 1;
            }
        }
        state.client().invalidate_episode(episode);
    }
    json!({"status": "success", "checks_cancelled": cancelled})
}

/// A failure event: trigger an immediate reconcile off the request path.
fn handle_failure(state: &AppState, payload: &WebhookPayload) -> serde_json::Value {
    let engine = state.engine().clone();
    let download_id = payload.download_id.clone();
    let episode = payload.episode_ids().first().copied();

    tokio::spawn(async move {
        let result = match (&download_id, episode) {
            (Some(download_id), _) => engine.reconcile_download(download_id).await,
            (None, Some(episode)) => engine.reconcile_episode(episode).await,
            (None, None) => {
                debug!("failure event without identifiers, nothing to check");
                return;
            }
        };
        if let Err(err) = result {
            warn!(error = %err, "immediate reconcile after failure event did not complete");
        }
    });

    json!({"status": "success", "message": "immediate check triggered"})
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
