//! Wire model for history events, episode files, and the custom-format
//! catalog.
//!
//! History is append-only upstream and consumed read-only here; the grab
//! event for a queue item is the source of truth for what the release scored
//! at grab time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DownloadId, EpisodeFileId, EpisodeId, QualityProfileId, SeriesId};

/// Event types recorded by the manager for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryEventType {
    Grabbed,
    DownloadFolderImported,
    DownloadFailed,
    DownloadIgnored,
    EpisodeFileDeleted,
    EpisodeFileRenamed,
    #[serde(other)]
    Unknown,
}

/// A named custom format attached to a release or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFormatRef {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default = "unknown_name")]
    pub name: String,
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

/// The free-form `data` bag on a history event. Only the indexer is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryData {
    #[serde(default)]
    pub indexer: Option<String>,
}

/// One manager-recorded event for an episode.
///
/// Identity upstream is `(episode_id, date, event_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_type: HistoryEventType,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub episode_id: Option<EpisodeId>,
    #[serde(default)]
    pub download_id: Option<DownloadId>,
    #[serde(default)]
    pub source_title: Option<String>,
    /// Absent when the manager predates score reporting; the client then
    /// computes it from `custom_formats` and the series' profile.
    #[serde(default)]
    pub custom_format_score: Option<i64>,
    #[serde(default)]
    pub custom_formats: Vec<CustomFormatRef>,
    #[serde(default)]
    pub data: HistoryData,
}

impl HistoryEvent {
    pub fn is_grab(&self) -> bool {
        self.event_type == HistoryEventType::Grabbed
    }

    pub fn format_names(&self) -> Vec<String> {
        self.custom_formats.iter().map(|cf| cf.name.clone()).collect()
    }
}

/// The currently-imported file for an episode, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeFile {
    pub id: EpisodeFileId,
    #[serde(default)]
    pub episode_id: Option<EpisodeId>,
    #[serde(default)]
    pub custom_format_score: Option<i64>,
    #[serde(default)]
    pub custom_formats: Vec<CustomFormatRef>,
    #[serde(default)]
    pub quality_profile_id: Option<QualityProfileId>,
}

impl EpisodeFile {
    pub fn format_names(&self) -> Vec<String> {
        self.custom_formats.iter().map(|cf| cf.name.clone()).collect()
    }
}

/// Episode detail, used to resolve the current file two-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: EpisodeId,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub episode_file_id: Option<EpisodeFileId>,
}

/// A catalog entry from `GET /customformat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFormat {
    pub id: u64,
    pub name: String,
}

/// A `(format, score)` pair inside a quality profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatItem {
    /// The custom format ID this score applies to.
    pub format: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub score: i64,
}

/// A quality profile: the per-series mapping from formats to scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub id: QualityProfileId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format_items: Vec<FormatItem>,
}

/// Series detail; only the profile linkage is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: SeriesId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub quality_profile_id: Option<QualityProfileId>,
}

/// The envelope the manager wraps paginated responses in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_records: u64,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
}
