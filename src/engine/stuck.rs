//! Stuck-item detection for queue snapshots.

use crate::types::{QueueItem, QueueStatus, TrackedStatus};

/// Status-message fragments that mark an import as needing intervention.
/// Matched case-insensitively against every message line.
const STUCK_MARKERS: &[&str] = &[
    "manual import required",
    "no files found",
    "already",
    "exists",
    "duplicate",
    "matched to series by id",
];

/// Whether a queue item looks like it will not import on its own.
///
/// Three signals, any of which qualifies:
/// - the tracked state is a stalled/failed import state,
/// - the download finished but the manager flags it with a warning,
/// - a status message contains a known stuck marker.
pub fn is_stuck(item: &QueueItem) -> bool {
    if item.tracked_state.is_stalled() {
        return true;
    }

    if item.status == QueueStatus::Completed && item.tracked_status == TrackedStatus::Warning {
        return true;
    }

    // Titles occasionally carry the marker instead of the message body;
    // check both.
    item.status_messages.iter().any(|status| {
        status
            .messages
            .iter()
            .chain(status.title.iter())
            .any(|message| {
                let message = message.to_lowercase();
                STUCK_MARKERS.iter().any(|marker| message.contains(marker))
            })
    })
}
