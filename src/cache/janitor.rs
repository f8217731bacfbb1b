use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::CacheService;

/// Background task that runs `Clean(Old)` on a fixed period.
///
/// Long-running processes build the façade once, so the one-in-N sweep on
/// construction would almost never fire. The janitor covers that case.
pub struct Janitor {
    stop: Arc<Notify>,
    sweeps: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl Janitor {
    /// Spawns the janitor. The first sweep happens one `period` from now.
    pub fn spawn(cache: CacheService, period: Duration) -> Self {
        let stop = Arc::new(Notify::new());
        let sweeps = Arc::new(AtomicU64::new(0));

        let task_stop = Arc::clone(&stop);
        let task_sweeps = Arc::clone(&sweeps);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs_f64(), "Cache janitor started");

            loop {
                tokio::select! {
                    _ = task_stop.notified() => break,
                    _ = interval.tick() => {
                        let cleaned = cache.sweep().await;
                        task_sweeps.fetch_add(1, Ordering::Relaxed);
                        debug!(cleaned, "Janitor sweep finished");
                    }
                }
            }

            info!("Cache janitor stopped");
        });

        Self {
            stop,
            sweeps,
            handle,
        }
    }

    /// Number of sweeps run so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Stops the janitor and waits for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        // notify_one keeps a permit, so a stop sent mid-sweep is not lost.
        self.stop.notify_one();
        let _ = self.handle.await;
    }
}
