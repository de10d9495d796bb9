//! Core domain types shared across the crate.

pub mod decision;
pub mod history;
pub mod ids;
pub mod queue;

pub use decision::{Decision, DecisionKind, TrackerClass};
pub use history::{
    CustomFormat, CustomFormatRef, Episode, EpisodeFile, FormatItem, HistoryEvent,
    HistoryEventType, Page, QualityProfile, Series,
};
pub use ids::{
    DownloadId, EpisodeFileId, EpisodeId, Fingerprint, QualityProfileId, QueueItemId, SeriesId,
};
pub use queue::{QueueItem, QueueStatus, StatusMessage, TrackedState, TrackedStatus};
