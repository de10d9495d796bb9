//! Wire model for the manager's download queue.
//!
//! Queue snapshots come from `GET /api/v3/queue`. The manager's payloads are
//! wide and evolve between releases, so every struct here tolerates unknown
//! fields and every enum has an `Unknown` catch-all; we only model what the
//! reconciliation path reads.

use serde::{Deserialize, Serialize};

use super::ids::{DownloadId, EpisodeId, QueueItemId, SeriesId};

/// Download-client status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// The manager's own tracking state for a queue entry.
///
/// `ImportPending` and `ImportBlocked` are the states this service exists
/// for: the download finished but the manager will not import it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedState {
    Downloading,
    Importing,
    ImportPending,
    ImportBlocked,
    ImportFailed,
    DownloadFailed,
    Imported,
    #[serde(other)]
    Unknown,
}

impl TrackedState {
    /// Whether this state indicates a stalled import or a failure.
    pub fn is_stalled(&self) -> bool {
        matches!(
            self,
            TrackedState::ImportPending
                | TrackedState::ImportBlocked
                | TrackedState::ImportFailed
                | TrackedState::DownloadFailed
        )
    }
}

/// Severity of the manager's tracking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedStatus {
    Ok,
    Warning,
    Error,
    #[serde(other)]
    Unknown,
}

/// One human-readable status message attached to a queue entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Nested episode stub included when the queue is fetched with
/// `includeEpisode=true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeStub {
    pub id: EpisodeId,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
}

/// Nested series stub included when the queue is fetched with
/// `includeSeries=true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStub {
    pub id: SeriesId,
    #[serde(default)]
    pub title: Option<String>,
}

/// A snapshot of one pending download in the manager's queue.
///
/// Observed read-only; the entry is created by the manager and disappears
/// from the queue once imported or removed. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    #[serde(default)]
    pub download_id: Option<DownloadId>,
    #[serde(default)]
    pub episode_id: Option<EpisodeId>,
    #[serde(default)]
    pub series_id: Option<SeriesId>,
    #[serde(default)]
    pub episode: Option<EpisodeStub>,
    #[serde(default)]
    pub series: Option<SeriesStub>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_status")]
    pub status: QueueStatus,
    #[serde(default = "default_tracked_state", rename = "trackedDownloadState")]
    pub tracked_state: TrackedState,
    #[serde(default = "default_tracked_status", rename = "trackedDownloadStatus")]
    pub tracked_status: TrackedStatus,
    #[serde(default)]
    pub status_messages: Vec<StatusMessage>,
    #[serde(default)]
    pub indexer: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    /// The release's quality object, carried opaquely and passed through
    /// verbatim on manual import.
    #[serde(default)]
    pub quality: Option<serde_json::Value>,
}

fn default_status() -> QueueStatus {
    QueueStatus::Unknown
}

fn default_tracked_state() -> TrackedState {
    TrackedState::Unknown
}

fn default_tracked_status() -> TrackedStatus {
    TrackedStatus::Unknown
}

impl QueueItem {
    /// The episode this entry is for, preferring the flat field over the
    /// nested stub (the manager populates either depending on query flags).
    pub fn episode_id(&self) -> Option<EpisodeId> {
        self.episode_id.or_else(|| self.episode.as_ref().map(|e| e.id))
    }

    /// The series this entry is for; same flat-then-nested preference.
    pub fn series_id(&self) -> Option<SeriesId> {
        self.series_id.or_else(|| self.series.as_ref().map(|s| s.id))
    }
}
