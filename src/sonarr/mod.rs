//! Client for the manager's HTTP API: typed endpoints, retries, and
//! read-through caching.

pub mod client;
pub mod error;
pub mod retry;

pub use client::{ClientConfig, ManualImport, SonarrClient, SystemStatus};
pub use error::SonarrError;
pub use retry::{retry_with_backoff, RetryConfig};
