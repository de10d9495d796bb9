//! import-warden — reconciles grab-time vs. import-time custom-format scores
//! for a Sonarr-compatible media manager.
//!
//! The manager grabs releases under one scoring regime (rich indexer
//! metadata) and imports them under another (filename-derived metadata),
//! which leaves some downloads stuck even though they were judged superior
//! at grab time. This crate watches the manager's queue and webhook events,
//! compares grab-time scores against the currently imported file, and takes
//! the corrective action: force the import, discard a worthless download, or
//! protect a ratio-sensitive one.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod sonarr;
pub mod types;
