//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using an
//! EpisodeId where a SeriesId is expected) and make the code more
//! self-documenting. All of them serialize transparently to the manager's
//! wire representation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A manager-assigned episode ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EpisodeId {
    fn from(n: u64) -> Self {
        EpisodeId(n)
    }
}

/// A manager-assigned series ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub u64);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeriesId {
    fn from(n: u64) -> Self {
        SeriesId(n)
    }
}

/// A queue entry ID.
///
/// Queue IDs are only stable for the lifetime of the entry; once the item is
/// imported or removed the ID is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub u64);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for QueueItemId {
    fn from(n: u64) -> Self {
        QueueItemId(n)
    }
}

/// An episode file ID (the currently-imported file for an episode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeFileId(pub u64);

impl fmt::Display for EpisodeFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A quality profile ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityProfileId(pub u64);

impl fmt::Display for QualityProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque download identifier issued by the download client.
///
/// The manager uses this to correlate queue entries, history events, and
/// webhook payloads; we never interpret its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub String);

impl DownloadId {
    pub fn new(s: impl Into<String>) -> Self {
        DownloadId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DownloadId {
    fn from(s: String) -> Self {
        DownloadId(s)
    }
}

impl From<&str> for DownloadId {
    fn from(s: &str) -> Self {
        DownloadId(s.to_string())
    }
}

/// The `(episode, download)` pair that identifies one in-flight grab.
///
/// Used to deduplicate scheduled checks and to key the acted-on cool-down
/// set: scheduling the same fingerprint twice coalesces into one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub episode: EpisodeId,
    pub download: DownloadId,
}

impl Fingerprint {
    pub fn new(episode: EpisodeId, download: impl Into<DownloadId>) -> Self {
        Fingerprint {
            episode,
            download: download.into(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.episode, self.download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn episode_id_serde_roundtrip(n: u64) {
            let id = EpisodeId(n);
            let json = serde_json::to_string(&id).unwrap();
            let parsed: EpisodeId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn episode_id_is_transparent(n: u64) {
            let id = EpisodeId(n);
            prop_assert_eq!(serde_json::to_string(&id).unwrap(), n.to_string());
        }

        #[test]
        fn download_id_serde_roundtrip(s in "[A-Za-z0-9]{1,64}") {
            let id = DownloadId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            let parsed: DownloadId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn fingerprint_equality_matches_components(a: u64, b: u64, s in "[A-Z0-9]{8}", t in "[A-Z0-9]{8}") {
            let fp_a = Fingerprint::new(EpisodeId(a), s.as_str());
            let fp_b = Fingerprint::new(EpisodeId(b), t.as_str());
            prop_assert_eq!(fp_a == fp_b, a == b && s == t);
        }

        #[test]
        fn fingerprint_display_is_colon_joined(n: u64, s in "[A-Z0-9]{8}") {
            let fp = Fingerprint::new(EpisodeId(n), s.as_str());
            prop_assert_eq!(format!("{}", fp), format!("{}:{}", n, s));
        }
    }
}
