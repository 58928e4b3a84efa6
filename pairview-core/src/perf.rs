//! Operation timing, explicitly constructed and injected.
//!
//! One `PerformanceMonitor` is created per engine instance and handed to
//! the differ and the session manager at construction time. Timings are
//! recorded through drop guards; the aggregate is logged once at session
//! end via `flush`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Operations slower than this are logged at warn level when recorded.
const SLOW_OP: Duration = Duration::from_secs(1);

/// Aggregate timing for one named operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl OpStats {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Collects per-operation timings for the lifetime of a session.
#[derive(Default)]
pub struct PerformanceMonitor {
    ops: Mutex<HashMap<String, OpStats>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts timing `op`; the elapsed time is recorded when the returned
    /// guard drops.
    pub fn start(&self, op: &str) -> OpTimer<'_> {
        OpTimer { monitor: self, op: op.to_owned(), started: Instant::now() }
    }

    pub fn record(&self, op: &str, elapsed: Duration) {
        if elapsed >= SLOW_OP {
            warn!(op, elapsed_ms = elapsed.as_millis() as u64, "slow operation");
        }
        let mut ops = self.ops.lock().unwrap_or_else(|e| e.into_inner());
        let stats = ops.entry(op.to_owned()).or_default();
        stats.count += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }

    /// Snapshot of all recorded operations, sorted by name.
    pub fn summary(&self) -> Vec<(String, OpStats)> {
        let ops = self.ops.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary: Vec<_> = ops.iter().map(|(k, v)| (k.clone(), *v)).collect();
        summary.sort_by(|a, b| a.0.cmp(&b.0));
        summary
    }

    /// Logs the aggregate timings and clears them.
    pub fn flush(&self) {
        for (op, stats) in self.summary() {
            info!(
                op = %op,
                count = stats.count,
                total_ms = stats.total.as_millis() as u64,
                mean_ms = stats.mean().as_millis() as u64,
                max_ms = stats.max.as_millis() as u64,
                "operation timing"
            );
        }
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Drop guard created by [`PerformanceMonitor::start`].
pub struct OpTimer<'a> {
    monitor: &'a PerformanceMonitor,
    op: String,
    started: Instant,
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        self.monitor.record(&self.op, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_records_on_drop() {
        let monitor = PerformanceMonitor::new();
        {
            let _timer = monitor.start("compute_diff");
        }
        {
            let _timer = monitor.start("compute_diff");
        }
        let summary = monitor.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].0, "compute_diff");
        assert_eq!(summary[0].1.count, 2);
    }

    #[test]
    fn flush_clears_recorded_stats() {
        let monitor = PerformanceMonitor::new();
        monitor.record("load_data", Duration::from_millis(5));
        monitor.flush();
        assert!(monitor.summary().is_empty());
    }
}
