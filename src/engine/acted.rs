//! Cool-down set for recently executed actions.
//!
//! Keyed by `(episode, download, decision kind)`: executing the same action
//! twice on an unchanged queue state within the TTL is suppressed. Entries
//! leave the set three ways: the cool-down expires, the item is observed
//! back in a non-stuck state ([`RecentlyActed::clear_item`] — a relapse is a
//! new situation and must be actionable at once), or the queue item itself
//! goes away (the key includes the download ID, which a re-grab replaces).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{DecisionKind, DownloadId, EpisodeId};

type Key = (EpisodeId, DownloadId, DecisionKind);

/// TTL set of `(episode, download, action)` triples.
pub struct RecentlyActed {
    ttl: Duration,
    entries: Mutex<HashMap<Key, Instant>>,
}

impl RecentlyActed {
    pub fn new(ttl: Duration) -> Self {
        RecentlyActed {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `kind` just ran for this item.
    pub fn insert(&self, episode: EpisodeId, download: &DownloadId, kind: DecisionKind) {
        let mut entries = self.entries.lock().expect("acted set poisoned");
        entries.insert((episode, download.clone(), kind), Instant::now() + self.ttl);
    }

    /// Whether `kind` ran for this item within the cool-down window.
    pub fn contains(&self, episode: EpisodeId, download: &DownloadId, kind: DecisionKind) -> bool {
        let now = Instant::now();
        let entries = self.entries.lock().expect("acted set poisoned");
        entries
            .get(&(episode, download.clone(), kind))
            .is_some_and(|expires| *expires > now)
    }

    /// Drops every recorded action for one `(episode, download)` pair.
    ///
    /// Called when the item is observed in a non-stuck state: a later
    /// relapse into a stuck state is a new situation and must be actionable
    /// before the TTL runs out.
    pub fn clear_item(&self, episode: EpisodeId, download: &DownloadId) {
        let mut entries = self.entries.lock().expect("acted set poisoned");
        entries.retain(|(e, d, _), _| *e != episode || d != download);
    }

    /// Drops expired entries.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("acted set poisoned");
        entries.retain(|_, expires| *expires > now);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("acted set poisoned").len()
    }
}
