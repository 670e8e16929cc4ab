//! Scheduled background sweeps.
//!
//! Two independent periodic tasks: assignment eviction (default every 10
//! minutes) and record purging (default every 30 minutes). Both stop when
//! the shared [`CancellationToken`] fires; [`Sweeper::shutdown`] cancels and
//! joins them.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::router::ProviderRouter;

/// How often each sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    /// Assignment eviction period.
    pub assignments: Duration,
    /// Record purge period.
    pub records: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            assignments: Duration::from_secs(10 * 60),
            records: Duration::from_secs(30 * 60),
        }
    }
}

/// Handle to the running sweep tasks.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct Sweeper {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Sweeper {
    /// Spawns both sweeps on the current runtime.
    #[must_use]
    pub fn start(router: Arc<ProviderRouter>, schedule: SweepSchedule, token: CancellationToken) -> Self {
        let tracker = TaskTracker::new();

        let assignments = Arc::clone(&router);
        spawn_periodic(&tracker, token.clone(), "assignments", schedule.assignments, move || {
            assignments.sweep_assignments()
        });
        spawn_periodic(&tracker, token.clone(), "records", schedule.records, move || {
            router.purge_records()
        });

        tracker.close();
        Self { tracker, token }
    }

    /// Cancels both sweeps and waits for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.tracker.wait().await;
        tracing::info!("sweeps stopped");
    }

    /// Waits for the sweeps to exit after the token was cancelled elsewhere.
    pub async fn join(&self) {
        self.tracker.wait().await;
    }
}

fn spawn_periodic<F>(tracker: &TaskTracker, token: CancellationToken, name: &'static str, period: Duration, sweep: F)
where
    F: Fn() -> usize + Send + 'static,
{
    tracker.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let removed = sweep();
                    if removed > 0 {
                        tracing::info!(sweep = name, removed, "sweep finished");
                    } else {
                        tracing::debug!(sweep = name, "sweep found nothing");
                    }
                }
            }
        }
    });
}
