use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timing breakdown of one solve attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptMetrics {
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub capture_ms: u64,
    pub ocr_ms: Option<u64>,
    pub outcome: String,
    pub total_ms: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_attempts: Vec<AttemptMetrics>,
    pub attempt_count: u64,
    pub accepted_count: u64,
    pub refreshed_count: u64,
    pub error_count: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_attempts: Vec::new(),
            attempt_count: 0,
            accepted_count: 0,
            refreshed_count: 0,
            error_count: 0,
        }
    }
}
