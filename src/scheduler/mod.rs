//! In-memory scheduler for delayed reconciliation checks.
//!
//! A grab webhook schedules a check for `now + import_check_delay`; an import
//! webhook cancels it. Tasks are keyed by [`Fingerprint`], and scheduling an
//! already-pending fingerprint coalesces instead of stacking timers — a grab
//! quickly followed by a re-grab must produce one check, not two. This is why
//! a sleep-per-request approach is not used.
//!
//! The clock is `tokio::time::Instant` (monotonic). A task is removed from
//! the store *before* its handler runs, so handlers can reschedule the same
//! fingerprint.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::Fingerprint;

/// Why a task was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A grab webhook asked for a follow-up import check.
    PostGrabCheck,
    /// A deferred item is being re-checked.
    Retry,
}

/// What `schedule` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new task was created.
    Scheduled,
    /// An existing task for the fingerprint absorbed this request; its
    /// deadline is the later of the two and its trigger the latest.
    Coalesced,
}

/// A task handed to the run loop's handler.
#[derive(Debug, Clone)]
pub struct FiredTask {
    pub fingerprint: Fingerprint,
    pub trigger: Trigger,
}

struct PendingTask {
    due_at: Instant,
    trigger: Trigger,
    /// Submission order, used to break ties between equal deadlines so
    /// past-due tasks fire in the order they were scheduled.
    seq: u64,
}

#[derive(Default)]
struct State {
    tasks: HashMap<Fingerprint, PendingTask>,
    next_seq: u64,
}

/// Single-process delayed task store with a dedicated run loop.
///
/// `schedule`/`cancel` are safe to call from any task while `run` is waiting.
pub struct DelayedScheduler {
    state: Mutex<State>,
    notify: Notify,
}

impl DelayedScheduler {
    pub fn new() -> Self {
        DelayedScheduler {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Schedules (or coalesces into) a task due after `delay`.
    pub fn schedule(
        &self,
        fingerprint: Fingerprint,
        delay: Duration,
        trigger: Trigger,
    ) -> ScheduleOutcome {
        let due_at = Instant::now() + delay;
        let outcome = {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            match state.tasks.get_mut(&fingerprint) {
                Some(task) => {
                    task.due_at = task.due_at.max(due_at);
                    task.trigger = trigger;
                    ScheduleOutcome::Coalesced
                }
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.tasks.insert(
                        fingerprint,
                        PendingTask {
                            due_at,
                            trigger,
                            seq,
                        },
                    );
                    ScheduleOutcome::Scheduled
                }
            }
        };
        // Wake the run loop so it can re-evaluate the earliest deadline.
        self.notify.notify_one();
        outcome
    }

    /// Cancels a pending task. Returns whether one existed.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        let removed = {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            state.tasks.remove(fingerprint).is_some()
        };
        if removed {
            debug!(fingerprint = %fingerprint, "cancelled pending check");
            self.notify.notify_one();
        }
        removed
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.state.lock().expect("scheduler lock poisoned").tasks.len()
    }

    /// Removes and returns the next due task, earliest deadline first,
    /// submission order breaking ties.
    fn pop_due(&self, now: Instant) -> Option<FiredTask> {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        let key = state
            .tasks
            .iter()
            .filter(|(_, task)| task.due_at <= now)
            .min_by_key(|(_, task)| (task.due_at, task.seq))
            .map(|(fingerprint, _)| fingerprint.clone())?;
        let task = state.tasks.remove(&key).expect("key was just found");
        Some(FiredTask {
            fingerprint: key,
            trigger: task.trigger,
        })
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.lock().expect("scheduler lock poisoned");
        state.tasks.values().map(|task| task.due_at).min()
    }

    /// Drives the scheduler until `shutdown` is cancelled.
    ///
    /// Fires each due task through `handler`, one at a time. The task is
    /// already removed when the handler runs, so rescheduling from inside the
    /// handler creates a fresh entry.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, handler: F)
    where
        F: Fn(FiredTask) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            while let Some(task) = self.pop_due(Instant::now()) {
                debug!(fingerprint = %task.fingerprint, "firing delayed check");
                handler(task).await;
            }

            if shutdown.is_cancelled() {
                return;
            }

            let deadline = self.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.notify.notified() => {}
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
        }
    }
}

impl Default for DelayedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EpisodeId;
    use std::sync::Arc;

    fn fingerprint(episode: u64, download: &str) -> Fingerprint {
        Fingerprint::new(EpisodeId(episode), download)
    }

    /// Runs the scheduler until it has been idle long enough for every
    /// already-due task to fire, collecting fired fingerprints.
    async fn collect_fired(
        scheduler: Arc<DelayedScheduler>,
        wait: Duration,
    ) -> Vec<Fingerprint> {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_handler = Arc::clone(&fired);
        let shutdown = CancellationToken::new();

        let run = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                scheduler
                    .run(shutdown, move |task| {
                        let fired = Arc::clone(&fired_handler);
                        async move {
                            fired.lock().unwrap().push(task.fingerprint);
                        }
                    })
                    .await;
            })
        };

        tokio::time::sleep(wait).await;
        shutdown.cancel();
        run.await.unwrap();

        let fired = fired.lock().unwrap().clone();
        fired
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_fires_after_its_delay() {
        let scheduler = Arc::new(DelayedScheduler::new());
        let outcome = scheduler.schedule(
            fingerprint(42, "D1"),
            Duration::from_secs(600),
            Trigger::PostGrabCheck,
        );
        assert_eq!(outcome, ScheduleOutcome::Scheduled);
        assert_eq!(scheduler.pending(), 1);

        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(601)).await;
        assert_eq!(fired, vec![fingerprint(42, "D1")]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_fingerprint_coalesces_to_the_later_deadline() {
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(42, "D1"), Duration::from_secs(600), Trigger::PostGrabCheck);
        let outcome = scheduler.schedule(
            fingerprint(42, "D1"),
            Duration::from_secs(900),
            Trigger::Retry,
        );
        assert_eq!(outcome, ScheduleOutcome::Coalesced);
        assert_eq!(scheduler.pending(), 1);

        // Nothing fires at the first deadline.
        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(700)).await;
        assert!(fired.is_empty());

        // One task fires at the later deadline.
        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(300)).await;
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn coalescing_keeps_the_later_of_the_two_deadlines() {
        // Re-scheduling with a shorter delay must not pull the deadline in.
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(1, "D"), Duration::from_secs(900), Trigger::PostGrabCheck);
        scheduler.schedule(fingerprint(1, "D"), Duration::from_secs(10), Trigger::PostGrabCheck);

        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(500)).await;
        assert!(fired.is_empty());
        assert_eq!(scheduler.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(42, "D1"), Duration::from_secs(60), Trigger::PostGrabCheck);

        assert!(scheduler.cancel(&fingerprint(42, "D1")));
        assert!(!scheduler.cancel(&fingerprint(42, "D1")));

        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(120)).await;
        assert!(fired.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn past_due_tasks_fire_in_submission_order() {
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(1, "A"), Duration::ZERO, Trigger::PostGrabCheck);
        scheduler.schedule(fingerprint(2, "B"), Duration::ZERO, Trigger::PostGrabCheck);
        scheduler.schedule(fingerprint(3, "C"), Duration::ZERO, Trigger::PostGrabCheck);

        let fired = collect_fired(Arc::clone(&scheduler), Duration::from_secs(1)).await;
        assert_eq!(
            fired,
            vec![fingerprint(1, "A"), fingerprint(2, "B"), fingerprint(3, "C")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handler_may_reschedule_the_same_fingerprint() {
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(7, "D"), Duration::from_secs(1), Trigger::PostGrabCheck);

        let count = Arc::new(Mutex::new(0u32));
        let count_handler = Arc::clone(&count);
        let scheduler_handler = Arc::clone(&scheduler);
        let shutdown = CancellationToken::new();

        let run = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                scheduler
                    .run(shutdown, move |task| {
                        let count = Arc::clone(&count_handler);
                        let scheduler = Arc::clone(&scheduler_handler);
                        async move {
                            let mut count = count.lock().unwrap();
                            *count += 1;
                            if *count == 1 {
                                // The store no longer holds this fingerprint,
                                // so this is a fresh schedule.
                                let outcome = scheduler.schedule(
                                    task.fingerprint,
                                    Duration::from_secs(1),
                                    Trigger::Retry,
                                );
                                assert_eq!(outcome, ScheduleOutcome::Scheduled);
                            }
                        }
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_trigger_wins_on_coalesce() {
        let scheduler = Arc::new(DelayedScheduler::new());
        scheduler.schedule(fingerprint(1, "D"), Duration::from_secs(5), Trigger::PostGrabCheck);
        scheduler.schedule(fingerprint(1, "D"), Duration::from_secs(5), Trigger::Retry);

        let trigger = Arc::new(Mutex::new(None));
        let trigger_handler = Arc::clone(&trigger);
        let shutdown = CancellationToken::new();

        let run = {
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                scheduler
                    .run(shutdown, move |task| {
                        let trigger = Arc::clone(&trigger_handler);
                        async move {
                            *trigger.lock().unwrap() = Some(task.trigger);
                        }
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(*trigger.lock().unwrap(), Some(Trigger::Retry));
    }
}
