//! The reconciliation engine: queue scanning, per-item decisions, and
//! idempotent execution.
//!
//! Two entry points converge on [`ReconcileEngine::reconcile`]: the periodic
//! scan selects stuck queue items, and the webhook path asks for a specific
//! episode or download. Reconcile is the single place mutating actions
//! happen, and invocations for the same download ID are serialized through a
//! per-key lock; different downloads reconcile concurrently.

mod acted;
mod stuck;

pub use acted::RecentlyActed;
pub use stuck::is_stuck;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::{
    decide, indexer_for_grab, select_grab_event, AnalyzerPolicy, ScoreInputs, TrackerLists,
};
use crate::cache::TtlCache;
use crate::metrics::Metrics;
use crate::sonarr::{ManualImport, SonarrClient, SonarrError};
use crate::types::{Decision, DecisionKind, DownloadId, EpisodeId, Fingerprint, QueueItem};

/// Engine configuration, resolved from the application config at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between periodic queue scans.
    pub interval: Duration,
    /// When set, mutating actions are logged but never sent.
    pub dry_run: bool,
    /// Cool-down for repeating the same action on an unchanged item.
    pub action_cooldown: Duration,
    pub policy: AnalyzerPolicy,
    pub trackers: TrackerLists,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            interval: Duration::from_secs(60),
            dry_run: false,
            action_cooldown: Duration::from_secs(600),
            policy: AnalyzerPolicy::default(),
            trackers: TrackerLists::default(),
        }
    }
}

/// What one reconcile invocation did.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// A decision was produced. `executed` is true only when a mutating call
    /// was actually sent (false for record-only kinds and dry-run).
    Decided { decision: Decision, executed: bool },
    /// The same action already ran for this item within the cool-down.
    CoolingDown(DecisionKind),
    /// The queue item carries no download or episode ID; nothing to do.
    Unidentified,
    /// The queue snapshot changed between decision and action; aborted.
    Superseded,
}

/// Tallies from one queue scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub candidates: usize,
    pub processed: usize,
    pub deferred: usize,
}

/// Per-download-id async locks so concurrent reconciles of the same item
/// cannot interleave.
struct KeyedLocks {
    locks: Mutex<HashMap<DownloadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        KeyedLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, key: &DownloadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drops map entries nobody is holding.
    fn prune(&self) {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Long-lived reconciliation component shared by the scan loop and the
/// webhook server.
pub struct ReconcileEngine {
    client: Arc<SonarrClient>,
    cache: Arc<TtlCache>,
    metrics: Arc<Metrics>,
    config: EngineConfig,
    acted: RecentlyActed,
    locks: KeyedLocks,
}

impl ReconcileEngine {
    pub fn new(
        client: Arc<SonarrClient>,
        cache: Arc<TtlCache>,
        metrics: Arc<Metrics>,
        config: EngineConfig,
    ) -> Self {
        let acted = RecentlyActed::new(config.action_cooldown);
        ReconcileEngine {
            client,
            cache,
            metrics,
            config,
            acted,
            locks: KeyedLocks::new(),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Runs the periodic scan loop until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            match self.scan().await {
                Ok(stats) if stats.candidates > 0 => {
                    info!(
                        cycle,
                        candidates = stats.candidates,
                        processed = stats.processed,
                        deferred = stats.deferred,
                        "scan cycle finished"
                    );
                }
                Ok(_) => debug!(cycle, "scan cycle finished, queue clean"),
                Err(err) => warn!(cycle, error = %err, "scan cycle failed"),
            }

            // Keep the cache bounded even when nothing is being read.
            self.cache.sweep();

            if cycle % 10 == 0 {
                let snapshot = self.metrics.snapshot(self.cache.stats());
                info!(
                    cycles = snapshot.queue_scans,
                    items = snapshot.items_processed,
                    forced = snapshot.forced_imports,
                    removed = snapshot.removals,
                    cache_hits = snapshot.cache.hits,
                    cache_misses = snapshot.cache.misses,
                    "running statistics"
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scan loop stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One scan: snapshot the queue, select stuck candidates, reconcile each.
    ///
    /// Candidates are processed sequentially; one item's failure (even a
    /// panic) never aborts the scan. An `Unauthorized` from the manager does
    /// abort, since every subsequent call would fail the same way.
    pub async fn scan(self: &Arc<Self>) -> Result<ScanStats, SonarrError> {
        self.metrics.record_queue_scan();
        let queue = self.client.queue().await?;

        // An item seen in a non-stuck state is a fresh situation: drop its
        // cool-down entries so a later relapse is actionable immediately,
        // not after the TTL.
        for item in queue.iter().filter(|item| !is_stuck(item)) {
            if let (Some(download_id), Some(episode)) = (&item.download_id, item.episode_id()) {
                self.acted.clear_item(episode, download_id);
            }
        }

        let candidates: Vec<QueueItem> = queue
            .iter()
            .filter(|item| is_stuck(item))
            .cloned()
            .collect();
        let mut stats = ScanStats {
            candidates: candidates.len(),
            ..ScanStats::default()
        };

        for item in candidates {
            let engine = Arc::clone(self);
            let item_id = item.id;
            // A spawned task contains panics: a poisoned item is logged and
            // the rest of the scan proceeds.
            let joined = tokio::spawn(async move { engine.reconcile(item).await }).await;
            match joined {
                Ok(Ok(_)) => stats.processed += 1,
                Ok(Err(SonarrError::Unauthorized)) => {
                    error!(item = %item_id, "manager rejected API key, aborting scan");
                    return Err(SonarrError::Unauthorized);
                }
                Ok(Err(SonarrError::NotFound(_))) => {
                    debug!(item = %item_id, "item vanished mid-scan, dropping");
                }
                Ok(Err(err)) => {
                    warn!(item = %item_id, error = %err, "reconcile deferred to next scan");
                    stats.deferred += 1;
                }
                Err(join_err) => {
                    error!(item = %item_id, error = %join_err, "reconcile panicked, continuing scan");
                    stats.deferred += 1;
                }
            }
        }

        self.locks.prune();
        self.acted.prune();
        Ok(stats)
    }

    /// Reconciles whatever queue item currently carries `download_id`.
    ///
    /// Used by the webhook failure path and the post-grab check; fetches a
    /// fresh queue snapshot first. Returns `None` when nothing matches.
    pub async fn reconcile_download(
        self: &Arc<Self>,
        download_id: &DownloadId,
    ) -> Result<Option<ReconcileOutcome>, SonarrError> {
        self.client.invalidate_queue();
        let queue = self.client.queue().await?;
        let item = queue
            .iter()
            .find(|item| item.download_id.as_ref() == Some(download_id))
            .cloned();
        match item {
            Some(item) => Ok(Some(self.reconcile(item).await?)),
            None => Ok(None),
        }
    }

    /// Reconciles whatever queue item currently references `episode`.
    pub async fn reconcile_episode(
        self: &Arc<Self>,
        episode: EpisodeId,
    ) -> Result<Option<ReconcileOutcome>, SonarrError> {
        self.client.invalidate_queue();
        let queue = self.client.queue().await?;
        let item = queue
            .iter()
            .find(|item| item.episode_id() == Some(episode))
            .cloned();
        match item {
            Some(item) => Ok(Some(self.reconcile(item).await?)),
            None => Ok(None),
        }
    }

    /// Follow-up for a grab that should have imported by now.
    ///
    /// If the fingerprint's download is still in the queue and stuck,
    /// reconcile it; if it is gone, the import happened in time.
    pub async fn post_grab_check(self: &Arc<Self>, fingerprint: &Fingerprint) {
        self.client.invalidate_queue();
        let queue = match self.client.queue().await {
            Ok(queue) => queue,
            Err(err) => {
                warn!(fingerprint = %fingerprint, error = %err, "post-grab check could not read queue");
                return;
            }
        };

        let item = queue
            .iter()
            .find(|item| item.download_id.as_ref() == Some(&fingerprint.download))
            .cloned();

        match item {
            Some(item) if is_stuck(&item) => {
                info!(fingerprint = %fingerprint, "grab still stuck after delay, reconciling");
                if let Err(err) = self.reconcile(item).await {
                    warn!(fingerprint = %fingerprint, error = %err, "post-grab reconcile failed");
                }
            }
            Some(item) => {
                if let (Some(download_id), Some(episode)) = (&item.download_id, item.episode_id()) {
                    self.acted.clear_item(episode, download_id);
                }
                debug!(fingerprint = %fingerprint, "download still progressing, leaving it alone");
            }
            None => {
                info!(fingerprint = %fingerprint, "imported in time");
            }
        }
    }

    /// Produces and executes a decision for one queue item.
    pub async fn reconcile(&self, item: QueueItem) -> Result<ReconcileOutcome, SonarrError> {
        let (Some(download_id), Some(episode)) = (item.download_id.clone(), item.episode_id())
        else {
            debug!(item = %item.id, "queue item lacks identifiers, skipping");
            return Ok(ReconcileOutcome::Unidentified);
        };

        // Serialize per download: overlapping webhook + scan invocations for
        // the same item must not both act.
        let key_lock = self.locks.acquire(&download_id);
        let _guard = key_lock.lock().await;

        let history = self.client.history_for_episode(episode).await?;
        let grab = select_grab_event(&history, Some(&download_id), Utc::now());

        let Some(grab) = grab else {
            let decision = no_grab_decision(&item, &self.config.trackers);
            self.metrics.record_item_processed();
            self.metrics.record_decision(decision.kind);
            debug!(item = %item.id, episode = %episode, "no usable grab history");
            return Ok(ReconcileOutcome::Decided {
                decision,
                executed: false,
            });
        };

        let tracker = self
            .config
            .trackers
            .classify(indexer_for_grab(Some(grab), item.indexer.as_deref()));
        let grab_score = self.client.score_for_event(grab, item.series_id()).await?;

        let current_file = self.client.episode_file(episode).await?;
        let current_score = match &current_file {
            Some(file) => Some(match file.custom_format_score {
                Some(score) => score,
                None => match item.series_id() {
                    Some(series) => self.client.compute_score(&file.custom_formats, series).await?,
                    None => 0,
                },
            }),
            None => None,
        };

        let inputs = ScoreInputs {
            grab_score,
            current_score,
            tracker,
            grab_formats: grab.format_names(),
            current_formats: current_file
                .as_ref()
                .map(|f| f.format_names())
                .unwrap_or_default(),
        };
        let decision = decide(&self.config.policy, &inputs);
        self.metrics.record_item_processed();

        info!(
            item = %item.id,
            episode = %episode,
            download = %download_id,
            decision = %decision.kind,
            grab_score = decision.grab_score,
            current_score = decision.current_score,
            difference = decision.score_difference,
            tracker = %decision.tracker,
            reason = %decision.reason,
            "analyzed queue item"
        );

        if !decision.kind.is_mutating() {
            self.metrics.record_decision(decision.kind);
            return Ok(ReconcileOutcome::Decided {
                decision,
                executed: false,
            });
        }

        if self.acted.contains(episode, &download_id, decision.kind) {
            debug!(
                item = %item.id,
                decision = %decision.kind,
                "action already taken recently, cooling down"
            );
            return Ok(ReconcileOutcome::CoolingDown(decision.kind));
        }

        if self.config.dry_run {
            info!(
                dry_run = true,
                item = %item.id,
                decision = %decision.kind,
                reason = %decision.reason,
                "dry run: would execute"
            );
            return Ok(ReconcileOutcome::Decided {
                decision,
                executed: false,
            });
        }

        // The decision was made for this exact snapshot; abort if the queue
        // has moved on and the item no longer carries the same download.
        if !self.snapshot_still_valid(&item, &download_id).await? {
            warn!(item = %item.id, "queue item changed since analysis, aborting action");
            return Ok(ReconcileOutcome::Superseded);
        }

        match decision.kind {
            DecisionKind::ForceImport => {
                self.execute_force_import(&item, grab, episode, &download_id)
                    .await?
            }
            DecisionKind::RemovePublic => {
                self.client
                    .remove_queue_item(item.id, true, Some(episode))
                    .await?;
                info!(item = %item.id, download = %download_id, "removed and blocklisted release");
            }
            DecisionKind::KeepPrivate | DecisionKind::NoAction => unreachable!("non-mutating"),
        }

        self.acted.insert(episode, &download_id, decision.kind);
        self.metrics.record_decision(decision.kind);
        Ok(ReconcileOutcome::Decided {
            decision,
            executed: true,
        })
    }

    /// Re-reads the queue and confirms the item still exists with the same
    /// download ID.
    async fn snapshot_still_valid(
        &self,
        item: &QueueItem,
        download_id: &DownloadId,
    ) -> Result<bool, SonarrError> {
        let queue = self.client.queue().await?;
        Ok(queue
            .iter()
            .any(|q| q.id == item.id && q.download_id.as_ref() == Some(download_id)))
    }

    async fn execute_force_import(
        &self,
        item: &QueueItem,
        grab: &crate::types::HistoryEvent,
        episode: EpisodeId,
        download_id: &DownloadId,
    ) -> Result<(), SonarrError> {
        let series = item
            .series_id()
            .ok_or(SonarrError::MissingIdentifier("seriesId"))?;
        let profile = self
            .client
            .profile_for_series(series)
            .await?
            .ok_or(SonarrError::MissingIdentifier("qualityProfileId"))?;
        let path = item
            .output_path
            .clone()
            .ok_or(SonarrError::MissingIdentifier("outputPath"))?;

        self.client
            .force_import(&ManualImport {
                download_id: download_id.clone(),
                episode_id: episode,
                path,
                quality: item.quality.clone(),
                custom_formats: grab.custom_formats.clone(),
                quality_profile_id: profile.id,
            })
            .await?;

        info!(
            item = %item.id,
            episode = %episode,
            download = %download_id,
            profile = %profile.id,
            "forced manual import"
        );
        Ok(())
    }
}

/// Decision for an item with no usable grab history: record-only.
fn no_grab_decision(item: &QueueItem, trackers: &TrackerLists) -> Decision {
    let tracker = trackers.classify(item.indexer.as_deref());
    Decision {
        kind: DecisionKind::NoAction,
        reason: "no grab event found for this download within the last 24 h".to_string(),
        grab_score: None,
        current_score: None,
        score_difference: None,
        tracker,
        missing_formats: Vec::new(),
        extra_formats: Vec::new(),
    }
}


#[cfg(test)]
impl ReconcileEngine {
    /// Test hook: whether the cool-down set holds this action.
    pub(crate) fn has_acted(
        &self,
        episode: EpisodeId,
        download: &DownloadId,
        kind: DecisionKind,
    ) -> bool {
        self.acted.contains(episode, download, kind)
    }
}
