//! Score analysis and decision making.
//!
//! Everything in this module is pure: no I/O, no clocks, no shared state.
//! The engine gathers the inputs (grab history, current file, tracker lists)
//! and this module turns them into a [`Decision`]. That split keeps the
//! decision table exhaustively testable.
//!
//! # Decision table
//!
//! Applied in order, first match wins (`g` = grab score, `c` = current score,
//! `T` = threshold):
//!
//! 1. `c` missing and `g ≥ T` → force import
//! 2. `g − c ≥ T` → force import
//! 3. `g − c ≤ −T` → remove (public), keep (private), keep (unknown, unless
//!    configured otherwise)
//! 4. `|g − c| < T` → no action
//!
//! A missing current file past rule 1 is scored as 0, matching the upstream
//! manager's own treatment.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;

use crate::types::{Decision, DecisionKind, DownloadId, HistoryEvent, TrackerClass};

/// How far back the grab fallback looks when no event matches the queue
/// item's download ID.
const GRAB_FALLBACK_WINDOW_HOURS: i64 = 24;

/// Configured indexer substrings for tracker classification.
#[derive(Debug, Clone, Default)]
pub struct TrackerLists {
    pub private: Vec<String>,
    pub public: Vec<String>,
}

impl TrackerLists {
    pub fn new(private: Vec<String>, public: Vec<String>) -> Self {
        TrackerLists { private, public }
    }

    /// Classifies an indexer by case-insensitive substring match.
    ///
    /// Private entries are checked first, so an indexer matching both lists
    /// is treated as private. No indexer, or no match, is `Unknown`.
    pub fn classify(&self, indexer: Option<&str>) -> TrackerClass {
        let Some(indexer) = indexer else {
            return TrackerClass::Unknown;
        };
        let indexer = indexer.to_lowercase();
        if indexer.is_empty() {
            return TrackerClass::Unknown;
        }

        if self.private.iter().any(|t| indexer.contains(&t.to_lowercase())) {
            return TrackerClass::Private;
        }
        if self.public.iter().any(|t| indexer.contains(&t.to_lowercase())) {
            return TrackerClass::Public;
        }
        TrackerClass::Unknown
    }
}

/// Policy knobs consulted by [`decide`].
#[derive(Debug, Clone)]
pub struct AnalyzerPolicy {
    /// Minimum score difference before any action is taken.
    pub force_import_threshold: i64,
    /// When false, public-tracker removals are recorded but not requested.
    pub remove_public_failures: bool,
    /// When true (default), an unknown tracker class is protected like a
    /// private one in the removal branch.
    pub protect_unknown_trackers: bool,
}

impl Default for AnalyzerPolicy {
    fn default() -> Self {
        AnalyzerPolicy {
            force_import_threshold: 10,
            remove_public_failures: true,
            protect_unknown_trackers: true,
        }
    }
}

/// The gathered numeric inputs for one queue item.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub grab_score: i64,
    /// Absent when the episode has no imported file.
    pub current_score: Option<i64>,
    pub tracker: TrackerClass,
    pub grab_formats: Vec<String>,
    pub current_formats: Vec<String>,
}

/// Applies the decision table to one queue item's inputs.
pub fn decide(policy: &AnalyzerPolicy, inputs: &ScoreInputs) -> Decision {
    let threshold = policy.force_import_threshold;
    let grab = inputs.grab_score;

    let grab_set: BTreeSet<&str> = inputs.grab_formats.iter().map(String::as_str).collect();
    let current_set: BTreeSet<&str> = inputs.current_formats.iter().map(String::as_str).collect();
    let missing_formats: Vec<String> =
        grab_set.difference(&current_set).map(|s| s.to_string()).collect();
    let extra_formats: Vec<String> =
        current_set.difference(&grab_set).map(|s| s.to_string()).collect();

    let decision = |kind, reason, score_difference| Decision {
        kind,
        reason,
        grab_score: Some(grab),
        current_score: inputs.current_score,
        score_difference,
        tracker: inputs.tracker,
        missing_formats: missing_formats.clone(),
        extra_formats: extra_formats.clone(),
    };

    if inputs.current_score.is_none() && grab >= threshold {
        let mut reason = format!(
            "no current file; grab score ({grab}) exceeds threshold ({threshold})"
        );
        append_missing(&mut reason, &missing_formats);
        return decision(DecisionKind::ForceImport, reason, None);
    }

    let current = inputs.current_score.unwrap_or(0);
    let diff = grab - current;

    if diff >= threshold {
        let mut reason = format!(
            "grab score ({grab}) is {diff} points higher than current file ({current})"
        );
        append_missing(&mut reason, &missing_formats);
        return decision(DecisionKind::ForceImport, reason, Some(diff));
    }

    if diff <= -threshold {
        return match inputs.tracker {
            TrackerClass::Public if policy.remove_public_failures => decision(
                DecisionKind::RemovePublic,
                format!(
                    "grab score materially lower (grab: {grab}, current: {current}, diff: {diff}); public tracker"
                ),
                Some(diff),
            ),
            TrackerClass::Public => decision(
                DecisionKind::NoAction,
                format!(
                    "grab score materially lower (diff: {diff}) but public removals are disabled"
                ),
                Some(diff),
            ),
            TrackerClass::Private => decision(
                DecisionKind::KeepPrivate,
                format!("would remove (diff: {diff}) but private tracker is protected"),
                Some(diff),
            ),
            TrackerClass::Unknown if policy.protect_unknown_trackers => decision(
                DecisionKind::KeepPrivate,
                format!("would remove (diff: {diff}) but unknown tracker is treated as protected"),
                Some(diff),
            ),
            TrackerClass::Unknown => decision(
                DecisionKind::RemovePublic,
                format!(
                    "grab score materially lower (grab: {grab}, current: {current}, diff: {diff}); unknown tracker treated as public"
                ),
                Some(diff),
            ),
        };
    }

    decision(
        DecisionKind::NoAction,
        format!("score difference ({diff}) within tolerance threshold ({threshold})"),
        Some(diff),
    )
}

fn append_missing(reason: &mut String, missing: &[String]) {
    if missing.is_empty() {
        return;
    }
    let shown: Vec<&str> = missing.iter().take(3).map(String::as_str).collect();
    reason.push_str(&format!(". Missing formats: {}", shown.join(", ")));
}

/// Picks the grab event a queue item should be scored against.
///
/// Preference order: the most recent `grabbed` event whose download ID
/// matches the item; otherwise the most recent grab within the last 24 h.
/// `None` when the episode has no usable grab history.
pub fn select_grab_event<'a>(
    history: &'a [HistoryEvent],
    download_id: Option<&DownloadId>,
    now: DateTime<Utc>,
) -> Option<&'a HistoryEvent> {
    let grabs = || history.iter().filter(|e| e.is_grab());

    if let Some(wanted) = download_id {
        let matching = grabs()
            .filter(|e| e.download_id.as_ref() == Some(wanted))
            .max_by_key(|e| e.date);
        if matching.is_some() {
            return matching;
        }
    }

    let cutoff = now - ChronoDuration::hours(GRAB_FALLBACK_WINDOW_HOURS);
    grabs().filter(|e| e.date >= cutoff).max_by_key(|e| e.date)
}

/// The indexer recorded on the selected grab, falling back to the queue
/// item's own indexer field.
pub fn indexer_for_grab<'a>(
    grab: Option<&'a HistoryEvent>,
    item_indexer: Option<&'a str>,
) -> Option<&'a str> {
    grab.and_then(|e| e.data.indexer.as_deref())
        .or(item_indexer)
        .filter(|s| !s.is_empty())
}
