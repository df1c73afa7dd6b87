use std::fmt::Write as _;

use serde::Serialize;

use super::aggregator::{SessionAggregator, SessionStats};

/// Human-facing rates derived from one group's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub total_sessions: u64,
    pub closed_early: u64,
    pub captcha_prompted: u64,
    pub captcha_filled: u64,
    pub captcha_loops: u64,
    pub solve_rate_pct: f64,
    pub loop_rate_pct: f64,
    pub avg_duration_secs: f64,
}

impl SessionSummary {
    /// Pure reduction; zero denominators yield zero rates, an empty duration
    /// list yields a zero average.
    pub fn from_stats(stats: &SessionStats) -> Self {
        let prompted = stats.captcha_prompted as f64;
        let rate = |count: u64| {
            if stats.captcha_prompted == 0 {
                0.0
            } else {
                count as f64 / prompted * 100.0
            }
        };
        let avg_duration_secs = if stats.durations.is_empty() {
            0.0
        } else {
            stats.durations.iter().sum::<f64>() / stats.durations.len() as f64
        };

        Self {
            total_sessions: stats.total_sessions,
            closed_early: stats.closed_early,
            captcha_prompted: stats.captcha_prompted,
            captcha_filled: stats.captcha_filled,
            captcha_loops: stats.captcha_loops,
            solve_rate_pct: rate(stats.captcha_filled),
            loop_rate_pct: rate(stats.captcha_loops),
            avg_duration_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub group: String,
    #[serde(flatten)]
    pub summary: SessionSummary,
}

/// The whole report, rows in first-seen group order so re-runs over the same
/// file render identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    pub groups: Vec<SummaryRow>,
}

impl SummaryReport {
    pub fn from_aggregator(aggregator: &SessionAggregator) -> Self {
        Self {
            groups: aggregator
                .groups()
                .map(|(key, stats)| SummaryRow {
                    group: key.to_string(),
                    summary: SessionSummary::from_stats(stats),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n=== Session Summary Report ===\n");
        if self.groups.is_empty() {
            let _ = writeln!(
                out,
                "No session data found. Is the log file empty or malformed?"
            );
            return out;
        }

        for row in &self.groups {
            let s = &row.summary;
            let _ = writeln!(out, "Session Group: {}", row.group);
            let _ = writeln!(out, "  Total Sessions:        {}", s.total_sessions);
            let _ = writeln!(out, "  User Closed Early:     {}", s.closed_early);
            let _ = writeln!(out, "  CAPTCHA Prompted:      {}", s.captcha_prompted);
            let _ = writeln!(out, "  CAPTCHA Filled:        {}", s.captcha_filled);
            let _ = writeln!(out, "  CAPTCHA Loops Found:   {}", s.captcha_loops);
            let _ = writeln!(out, "  CAPTCHA Solve Rate:    {:.1}%", s.solve_rate_pct);
            let _ = writeln!(out, "  CAPTCHA Loop Rate:     {:.1}%", s.loop_rate_pct);
            let _ = writeln!(
                out,
                "  Avg. Session Duration: {:.2} sec",
                s.avg_duration_secs
            );
            let _ = writeln!(out, "{}", "-".repeat(40));
        }
        out
    }
}
