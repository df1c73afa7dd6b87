mod types;

pub use types::{AttemptMetrics, MetricsSnapshot, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_ATTEMPTS: usize = 20;

/// Collects per-attempt timings and process resource usage across a run.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_attempts: Vec<AttemptMetrics>,
    attempt_count: u64,
    accepted_count: u64,
    refreshed_count: u64,
    error_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // First refresh establishes the baseline the CPU delta needs.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_attempts: Vec::with_capacity(MAX_RECENT_ATTEMPTS),
                attempt_count: 0,
                accepted_count: 0,
                refreshed_count: 0,
                error_count: 0,
                system,
                pid,
            })),
        }
    }

    /// Sample current CPU and memory usage for the running process.
    pub async fn sample_system_metrics(&self) -> (f32, f64) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        if let Some(process) = state.system.process(pid) {
            (
                process.cpu_usage(),
                process.memory() as f64 / 1024.0 / 1024.0,
            )
        } else {
            (0.0, 0.0)
        }
    }

    pub async fn record_attempt(&self, metrics: AttemptMetrics) {
        let mut state = self.inner.lock().await;

        state.attempt_count += 1;
        match metrics.outcome.as_str() {
            "accepted" => state.accepted_count += 1,
            "refreshed" => state.refreshed_count += 1,
            "error" => state.error_count += 1,
            _ => {}
        }

        state.recent_attempts.push(metrics);
        if state.recent_attempts.len() > MAX_RECENT_ATTEMPTS {
            state.recent_attempts.remove(0);
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = if let Some(process) = state.system.process(pid) {
            SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            }
        } else {
            SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            }
        };

        MetricsSnapshot {
            system,
            recent_attempts: state.recent_attempts.clone(),
            attempt_count: state.attempt_count,
            accepted_count: state.accepted_count,
            refreshed_count: state.refreshed_count,
            error_count: state.error_count,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_attempts.clear();
        state.attempt_count = 0;
        state.accepted_count = 0;
        state.refreshed_count = 0;
        state.error_count = 0;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(outcome: &str) -> AttemptMetrics {
        AttemptMetrics {
            timestamp: Utc::now(),
            attempt: 1,
            capture_ms: 12,
            ocr_ms: Some(300),
            outcome: outcome.to_string(),
            total_ms: 350,
            cpu_percent: 0.0,
            memory_mb: 0.0,
        }
    }

    #[tokio::test]
    async fn outcome_counters_track_recorded_attempts() {
        let collector = MetricsCollector::new();
        collector.record_attempt(attempt("refreshed")).await;
        collector.record_attempt(attempt("refreshed")).await;
        collector.record_attempt(attempt("accepted")).await;
        collector.record_attempt(attempt("error")).await;

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.attempt_count, 4);
        assert_eq!(snapshot.accepted_count, 1);
        assert_eq!(snapshot.refreshed_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.recent_attempts.len(), 4);
    }

    #[tokio::test]
    async fn recent_buffer_is_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(MAX_RECENT_ATTEMPTS + 5) {
            collector.record_attempt(attempt("empty")).await;
        }

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.recent_attempts.len(), MAX_RECENT_ATTEMPTS);
        assert_eq!(snapshot.attempt_count, (MAX_RECENT_ATTEMPTS + 5) as u64);
    }

    #[tokio::test]
    async fn reset_clears_counters_but_not_identity() {
        let collector = MetricsCollector::new();
        collector.record_attempt(attempt("accepted")).await;
        collector.reset().await;

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.attempt_count, 0);
        assert!(snapshot.recent_attempts.is_empty());
    }
}
