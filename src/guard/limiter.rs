use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};

use crate::config::LimiterConfig;

#[derive(Debug, Clone, Copy)]
struct OriginRecord {
    last_call: Instant,
    calls: u64,
}

struct Sweeper {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Spaces out calls to the analysis service per origin and remembers how many
/// calls each origin has made.
///
/// The origin table is only bounded by sweeps: a background task removes
/// stale origins on a fixed interval, and `record_request` sweeps early when
/// the table grows past `max_tracked_origins`.
pub struct AnalysisRateLimiter {
    origins: Arc<DashMap<String, OriginRecord>>,
    cfg: LimiterConfig,
    sweeper: Mutex<Option<Sweeper>>,
}

impl AnalysisRateLimiter {
    /// Must be called from within a tokio runtime; spawns the sweeper.
    pub fn new(cfg: LimiterConfig) -> Self {
        let origins = Arc::new(DashMap::new());
        let sweeper = spawn_sweeper(origins.clone(), cfg.stale_after, cfg.sweep_interval);

        Self {
            origins,
            cfg,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn should_allow(&self, origin: &str) -> bool {
        match self.origins.get(origin) {
            Some(record) => record.last_call.elapsed() > self.cfg.min_interval,
            None => true,
        }
    }

    /// Claims the next analysis slot for `origin`. Check and stamp happen
    /// under one entry lock, so a burst from the same origin gets exactly
    /// one slot per interval. The call count is left to `record_request`.
    pub fn try_acquire(&self, origin: &str) -> bool {
        let now = Instant::now();
        let acquired = match self.origins.entry(origin.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now.duration_since(record.last_call) > self.cfg.min_interval {
                    record.last_call = now;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(OriginRecord {
                    last_call: now,
                    calls: 0,
                });
                true
            }
        };

        if acquired {
            self.sweep_if_over_limit();
        }
        acquired
    }

    pub fn record_request(&self, origin: &str) {
        let now = Instant::now();
        self.origins
            .entry(origin.to_string())
            .and_modify(|record| {
                record.last_call = now;
                record.calls += 1;
            })
            .or_insert(OriginRecord {
                last_call: now,
                calls: 1,
            });

        self.sweep_if_over_limit();
    }

    fn sweep_if_over_limit(&self) {
        if self.tracked_origins() > self.cfg.max_tracked_origins {
            let removed = self.sweep();
            tracing::debug!(
                removed,
                tracked = self.tracked_origins(),
                "origin table over soft limit; swept early"
            );
        }
    }

    pub fn request_count(&self, origin: &str) -> u64 {
        self.origins.get(origin).map(|r| r.calls).unwrap_or(0)
    }

    pub fn tracked_origins(&self) -> usize {
        self.origins.len()
    }

    pub fn sweep(&self) -> usize {
        sweep_stale(&self.origins, self.cfg.stale_after)
    }

    /// Stops the background sweeper. Later calls are no-ops.
    pub async fn destroy(&self) {
        let Some(sweeper) = self.sweeper.lock().await.take() else {
            tracing::debug!("analysis rate limiter already destroyed");
            return;
        };

        let _ = sweeper.stop_tx.send(true);
        if let Err(err) = sweeper.task.await {
            tracing::warn!(error = %err, "origin sweeper ended abnormally");
        }
    }
}

fn sweep_stale(origins: &DashMap<String, OriginRecord>, stale_after: Duration) -> usize {
    let now = Instant::now();
    let before = origins.len();
    origins.retain(|_, record| now.duration_since(record.last_call) <= stale_after);
    before.saturating_sub(origins.len())
}

fn spawn_sweeper(
    origins: Arc<DashMap<String, OriginRecord>>,
    stale_after: Duration,
    every: Duration,
) -> Sweeper {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = sweep_stale(&origins, stale_after);
                    if removed > 0 {
                        tracing::debug!(removed, tracked = origins.len(), "swept stale origins");
                    }
                }
                changed = stop_rx.changed() => {
                    // A dropped sender also ends the loop.
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("origin sweeper stopped");
    });

    Sweeper { stop_tx, task }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::AnalysisRateLimiter;
    use crate::config::LimiterConfig;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn limiter(max_tracked_origins: usize) -> AnalysisRateLimiter {
        limiter_sweeping_every(Duration::from_secs(5 * 60), max_tracked_origins)
    }

    fn limiter_sweeping_every(every: Duration, max_tracked_origins: usize) -> AnalysisRateLimiter {
        AnalysisRateLimiter::new(LimiterConfig {
            min_interval: Duration::from_millis(1_000),
            stale_after: HOUR,
            sweep_interval: every,
            max_tracked_origins,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_origin_is_allowed() {
        let limiter = limiter(100);
        assert!(limiter.should_allow("10.0.0.1"));
        assert_eq!(limiter.request_count("10.0.0.1"), 0);
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn calls_inside_interval_are_refused() {
        let limiter = limiter(100);
        limiter.record_request("10.0.0.1");

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!limiter.should_allow("10.0.0.1"));
        assert!(limiter.should_allow("10.0.0.2"));

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(limiter.should_allow("10.0.0.1"));
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn counts_accumulate_per_origin() {
        let limiter = limiter(100);
        limiter.record_request("a");
        limiter.record_request("a");
        limiter.record_request("b");

        assert_eq!(limiter.request_count("a"), 2);
        assert_eq!(limiter.request_count("b"), 1);
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_stale_origins() {
        let limiter = limiter_sweeping_every(24 * HOUR, 100);
        limiter.record_request("old");
        tokio::time::advance(Duration::from_secs(50 * 60)).await;
        limiter.record_request("fresh");
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.request_count("old"), 0);
        assert_eq!(limiter.request_count("fresh"), 1);
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_evicts_stale_origins() {
        let limiter = limiter(100);
        limiter.record_request("10.0.0.1");

        tokio::time::sleep(Duration::from_secs(66 * 60)).await;

        assert_eq!(limiter.tracked_origins(), 0);
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_stops_background_sweep() {
        let limiter = limiter(100);
        limiter.record_request("10.0.0.1");
        limiter.destroy().await;
        limiter.destroy().await;

        tokio::time::sleep(Duration::from_secs(2 * 60 * 60)).await;

        assert_eq!(limiter.tracked_origins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_triggers_early_sweep() {
        let limiter = limiter_sweeping_every(24 * HOUR, 2);
        limiter.record_request("a");
        limiter.record_request("b");
        tokio::time::advance(Duration::from_secs(61 * 60)).await;

        limiter.record_request("c");

        assert_eq!(limiter.tracked_origins(), 1);
        assert_eq!(limiter.request_count("c"), 1);
        limiter.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_claims_one_slot_per_interval() {
        let limiter = limiter(100);

        assert!(limiter.try_acquire("10.0.0.1"));
        assert!(!limiter.try_acquire("10.0.0.1"));
        assert!(!limiter.should_allow("10.0.0.1"));
        assert_eq!(limiter.request_count("10.0.0.1"), 0);

        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert!(limiter.try_acquire("10.0.0.1"));
        limiter.destroy().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_from_one_origin_wins_once() {
        let limiter = Arc::new(limiter(100));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_acquire("10.0.0.7") })
            })
            .collect();

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        limiter.destroy().await;
    }
}
