//! Liveness and metrics endpoints.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::metrics::MetricsSnapshot;

use super::AppState;

/// `GET /health`: liveness probe with a cache summary.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.cache().stats();
    Json(json!({
        "status": "healthy",
        "service": "import-warden",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.metrics().uptime_seconds(),
        "cache": {
            "size": cache.size,
            "active": cache.active,
            "expired": cache.expired,
        },
    }))
}

/// `GET /metrics`: JSON snapshot of every counter.
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics().snapshot(state.cache().stats()))
}
