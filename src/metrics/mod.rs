//! Process-wide counters exposed through the `/metrics` endpoint.
//!
//! Counters are plain atomics behind one long-lived [`Metrics`] value that is
//! constructed at startup and shared by reference; there is no module-level
//! state. No external metrics protocol is spoken — `/metrics` serves a JSON
//! snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::cache::CacheStats;
use crate::types::DecisionKind;

/// Shared counter registry.
pub struct Metrics {
    started_at: Instant,
    queue_scans: AtomicU64,
    items_processed: AtomicU64,
    forced_imports: AtomicU64,
    removals: AtomicU64,
    keeps: AtomicU64,
    no_actions: AtomicU64,
    api_requests: AtomicU64,
    webhook_auth_failures: AtomicU64,
    webhook_rate_limited: AtomicU64,
    webhook_events: Mutex<HashMap<String, u64>>,
}

/// Serializable point-in-time view of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub queue_scans: u64,
    pub items_processed: u64,
    pub forced_imports: u64,
    pub removals: u64,
    pub keeps: u64,
    pub no_actions: u64,
    pub api_requests: u64,
    pub webhook_auth_failures: u64,
    pub webhook_rate_limited: u64,
    pub webhook_events: HashMap<String, u64>,
    pub cache: CacheStats,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            started_at: Instant::now(),
            queue_scans: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            forced_imports: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            keeps: AtomicU64::new(0),
            no_actions: AtomicU64::new(0),
            api_requests: AtomicU64::new(0),
            webhook_auth_failures: AtomicU64::new(0),
            webhook_rate_limited: AtomicU64::new(0),
            webhook_events: Mutex::new(HashMap::new()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn record_queue_scan(&self) {
        self.queue_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.webhook_auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.webhook_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps the per-event-type webhook counter.
    pub fn record_webhook_event(&self, event_type: &str) {
        let mut events = self.webhook_events.lock().expect("metrics lock poisoned");
        *events.entry(event_type.to_string()).or_insert(0) += 1;
    }

    /// Bumps the outcome counter matching an executed decision.
    pub fn record_decision(&self, kind: DecisionKind) {
        let counter = match kind {
            DecisionKind::ForceImport => &self.forced_imports,
            DecisionKind::RemovePublic => &self.removals,
            DecisionKind::KeepPrivate => &self.keeps,
            DecisionKind::NoAction => &self.no_actions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            queue_scans: self.queue_scans.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            forced_imports: self.forced_imports.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            keeps: self.keeps.load(Ordering::Relaxed),
            no_actions: self.no_actions.load(Ordering::Relaxed),
            api_requests: self.api_requests.load(Ordering::Relaxed),
            webhook_auth_failures: self.webhook_auth_failures.load(Ordering::Relaxed),
            webhook_rate_limited: self.webhook_rate_limited.load(Ordering::Relaxed),
            webhook_events: self
                .webhook_events
                .lock()
                .expect("metrics lock poisoned")
                .clone(),
            cache,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
