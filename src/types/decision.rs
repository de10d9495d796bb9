//! The analyzer's output: an immutable decision with its numeric inputs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The tracker classification of a queue item's indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerClass {
    Private,
    Public,
    Unknown,
}

impl fmt::Display for TrackerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackerClass::Private => "private",
            TrackerClass::Public => "public",
            TrackerClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the engine should do with a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Trigger a manual import with the grab's formats and profile.
    ForceImport,
    /// Remove the queue item and blocklist the release (public trackers only).
    RemovePublic,
    /// Would remove, but the tracker is protected; record only.
    KeepPrivate,
    /// Scores within tolerance, or not enough information; record only.
    NoAction,
}

impl DecisionKind {
    /// Whether executing this decision mutates the manager.
    pub fn is_mutating(&self) -> bool {
        matches!(self, DecisionKind::ForceImport | DecisionKind::RemovePublic)
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionKind::ForceImport => "force_import",
            DecisionKind::RemovePublic => "remove_public",
            DecisionKind::KeepPrivate => "keep_private",
            DecisionKind::NoAction => "no_action",
        };
        f.write_str(s)
    }
}

/// An import decision with its reasoning and the numbers that produced it.
///
/// Immutable once produced; the engine never mutates the manager without one
/// computed for the exact queue snapshot it is acting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub reason: String,
    pub grab_score: Option<i64>,
    pub current_score: Option<i64>,
    pub score_difference: Option<i64>,
    pub tracker: TrackerClass,
    /// Formats present at grab but missing from the current file.
    pub missing_formats: Vec<String>,
    /// Formats on the current file that the grab lacked.
    pub extra_formats: Vec<String>,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}
