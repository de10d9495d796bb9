//! HTTP server: webhook ingress, liveness, and metrics.
//!
//! # Endpoints
//!
//! - `POST /webhook/sonarr` — manager event notifications (auth + rate limit)
//! - `GET /webhook/sonarr` — endpoint description for operators
//! - `GET /health` — liveness probe with cache summary
//! - `GET /metrics` — JSON counter snapshot

use std::sync::Arc;
use std::time::Duration;

pub mod auth;
pub mod health;
pub mod rate_limit;
pub mod webhook;

pub use auth::{authenticate, compute_signature, format_signature_header, verify_signature};
pub use health::{health_handler, metrics_handler};
pub use rate_limit::RateLimiter;
pub use webhook::{webhook_handler, webhook_info, DeliveryDeduper, WebhookError};

use crate::cache::TtlCache;
use crate::engine::ReconcileEngine;
use crate::metrics::Metrics;
use crate::scheduler::DelayedScheduler;
use crate::sonarr::SonarrClient;

/// Server-side configuration resolved from the application config.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared webhook secret; `None` leaves the endpoint open.
    pub secret: Option<String>,
    /// Delay between a grab and its follow-up import check.
    pub import_check_delay: Duration,
    /// Per-address request budget per minute.
    pub rate_limit_per_min: u32,
}

/// Shared application state, passed to handlers via Axum's `State`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: Arc<ReconcileEngine>,
    scheduler: Arc<DelayedScheduler>,
    client: Arc<SonarrClient>,
    cache: Arc<TtlCache>,
    metrics: Arc<Metrics>,
    secret: Option<String>,
    import_check_delay: Duration,
    rate_limiter: RateLimiter,
    deduper: DeliveryDeduper,
}

impl AppState {
    pub fn new(
        engine: Arc<ReconcileEngine>,
        scheduler: Arc<DelayedScheduler>,
        client: Arc<SonarrClient>,
        cache: Arc<TtlCache>,
        metrics: Arc<Metrics>,
        config: ServerConfig,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_min, Duration::from_secs(60));
        AppState {
            inner: Arc::new(AppStateInner {
                engine,
                scheduler,
                client,
                cache,
                metrics,
                secret: config.secret,
                import_check_delay: config.import_check_delay,
                rate_limiter,
                deduper: DeliveryDeduper::new(),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<ReconcileEngine> {
        &self.inner.engine
    }

    pub fn scheduler(&self) -> &DelayedScheduler {
        &self.inner.scheduler
    }

    pub fn client(&self) -> &SonarrClient {
        &self.inner.client
    }

    pub fn cache(&self) -> &TtlCache {
        &self.inner.cache
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn secret(&self) -> Option<&str> {
        self.inner.secret.as_deref()
    }

    pub fn import_check_delay(&self) -> Duration {
        self.inner.import_check_delay
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn deduper(&self) -> &DeliveryDeduper {
        &self.inner.deduper
    }
}

/// Builds the axum router with every endpoint.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook/sonarr", post(webhook_handler).get(webhook_info))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
