use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::warn;
use serde::Serialize;

use super::context::ScanContext;
use crate::events::{parse_line, EventKind, EventRecord};

pub const REASON_USER_CLOSED: &str = "user_closed";

/// Running counters for one session group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub closed_early: u64,
    pub captcha_prompted: u64,
    pub captcha_filled: u64,
    pub captcha_loops: u64,
    /// Seconds per correlated start/termination pair, in stream order.
    pub durations: Vec<f64>,
}

/// Reconstructs per-group session statistics from an append-only event
/// stream. One scan per source; re-running over the same bytes yields the
/// same report.
pub struct SessionAggregator {
    context: ScanContext,
    stats: HashMap<String, SessionStats>,
    key_order: Vec<String>,
    // Last unconsumed start per key. A start with a missing timestamp still
    // overwrites, and a termination reads without clearing — a later
    // termination for the same key reuses the stale start. See DESIGN.md.
    pending_starts: HashMap<String, Option<NaiveDateTime>>,
    skipped_lines: u64,
}

impl Default for SessionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self {
            context: ScanContext::new(),
            stats: HashMap::new(),
            key_order: Vec::new(),
            pending_starts: HashMap::new(),
            skipped_lines: 0,
        }
    }

    /// Scan a whole log file. Failure to open is the only fatal error;
    /// everything inside the file degrades line by line.
    pub fn scan_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self::scan_reader(BufReader::new(file)))
    }

    pub fn scan_reader<R: BufRead>(reader: R) -> Self {
        let mut aggregator = Self::new();
        for line in reader.lines() {
            match line {
                Ok(line) => aggregator.ingest_line(&line),
                Err(err) => {
                    // Partial statistics from a truncated source are the
                    // expected degradation, not a failure.
                    warn!("stopping scan on unreadable input: {err}");
                    break;
                }
            }
        }
        aggregator
    }

    /// Parse and ingest one line; malformed lines are counted and dropped.
    pub fn ingest_line(&mut self, line: &str) {
        match parse_line(line) {
            Some(record) => self.ingest(&record),
            None => {
                if !line.trim().is_empty() {
                    self.skipped_lines += 1;
                }
            }
        }
    }

    /// Apply one record to the aggregate map. Never fails: malformed input
    /// is absorbed by skipping the effect it would have had.
    pub fn ingest(&mut self, record: &EventRecord) {
        self.context = self.context.absorb(record);
        let key = self.context.session_key();

        match record.kind {
            EventKind::SessionStart => {
                self.entry(&key).total_sessions += 1;
                self.pending_starts.insert(key, record.timestamp);
            }
            EventKind::CaptchaDetected => self.entry(&key).captcha_prompted += 1,
            EventKind::CaptchaFilled => self.entry(&key).captcha_filled += 1,
            EventKind::CaptchaLoopDetected => self.entry(&key).captcha_loops += 1,
            EventKind::SessionTerminated => {
                if record.reason.as_deref() == Some(REASON_USER_CLOSED) {
                    self.entry(&key).closed_early += 1;
                }
                if let Some(end) = record.timestamp {
                    let start = self.pending_starts.get(&key).copied().flatten();
                    if let Some(start) = start {
                        let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
                        self.entry(&key).durations.push(seconds);
                    }
                }
            }
            // Solver transition detail; carried in the stream but not
            // aggregated.
            _ => {}
        }
    }

    /// Groups in first-seen order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &SessionStats)> {
        self.key_order
            .iter()
            .filter_map(|key| self.stats.get(key).map(|stats| (key.as_str(), stats)))
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    fn entry(&mut self, key: &str) -> &mut SessionStats {
        if !self.stats.contains_key(key) {
            self.key_order.push(key.to_string());
            self.stats.insert(key.to_string(), SessionStats::default());
        }
        self.stats
            .get_mut(key)
            .expect("stats entry inserted above")
    }
}
