//! Per-remote-address sliding-window rate limiting.
//!
//! Each admit check trims the calling address's timestamps older than the
//! window; a periodic [`RateLimiter::prune`] (driven by a ticker at startup)
//! drops addresses that have gone idle, so the map does not accumulate an
//! entry for every address that ever called. At exactly the limit a request
//! is still admitted; one past it is shed with 429.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Sliding-window request counter keyed by remote address.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or sheds one request from `addr`, recording it if admitted.
    pub fn admit(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let cutoff = now - self.window;
        let mut requests = self.requests.lock().expect("rate limiter poisoned");

        let timestamps = requests.entry(addr).or_default();
        timestamps.retain(|t| *t > cutoff);

        if timestamps.len() >= self.max_requests as usize {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Drops addresses with no requests inside the window.
    pub fn prune(&self) {
        let cutoff = Instant::now() - self.window;
        let mut requests = self.requests.lock().expect("rate limiter poisoned");
        requests.retain(|_, timestamps| {
            timestamps.retain(|t| *t > cutoff);
            !timestamps.is_empty()
        });
    }
}
