use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::backend::{BackendOp, ProfileSink};

/// Process-wide backend call counters.
///
/// Fed by the profiling decorator; never persisted. Counters only grow, so
/// relaxed atomics are enough.
#[derive(Debug, Default)]
pub struct CacheStats {
    calls: AtomicU64,
    loads: AtomicU64,
    saves: AtomicU64,
    elapsed_nanos: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one backend call.
    pub fn calc(&self, elapsed: Duration, op: BackendOp) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match op {
            BackendOp::Load | BackendOp::LoadMany => {
                self.loads.fetch_add(1, Ordering::Relaxed);
            }
            BackendOp::Save => {
                self.saves.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            elapsed: Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl ProfileSink for CacheStats {
    fn record(&self, elapsed: Duration, op: BackendOp) {
        self.calc(elapsed, op);
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Every backend call, including set and index traffic.
    pub calls: u64,
    /// `load` and `load_many` calls.
    pub loads: u64,
    pub saves: u64,
    /// Summed wall time of all calls.
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_counts_by_kind() {
        let stats = CacheStats::new();
        stats.calc(Duration::from_millis(2), BackendOp::Load);
        stats.calc(Duration::from_millis(3), BackendOp::LoadMany);
        stats.calc(Duration::from_millis(5), BackendOp::Save);
        stats.calc(Duration::from_millis(1), BackendOp::Clean);

        let snap = stats.snapshot();
        assert_eq!(snap.calls, 4);
        assert_eq!(snap.loads, 2);
        assert_eq!(snap.saves, 1);
        assert_eq!(snap.elapsed, Duration::from_millis(11));
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = CacheStats::new();
        stats.record(Duration::from_micros(10), BackendOp::Save);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["calls"], 1);
        assert_eq!(json["saves"], 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = std::sync::Arc::new(CacheStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        stats.calc(Duration::from_nanos(1), BackendOp::Load);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.calls, 8_000);
        assert_eq!(snap.loads, 8_000);
    }
}
