use std::{
    collections::HashMap,
    fmt::Write as _,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;

const BLOCK_SEPARATOR: &str = "------------------------";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One dash-separated block of the plain-text session log, the older format
/// written before the JSONL event stream existed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedSession {
    pub origin: Option<String>,
    pub started: Option<NaiveDateTime>,
    pub ended: Option<NaiveDateTime>,
    pub success: bool,
    pub reason: Option<String>,
    pub captcha_attempts: u64,
}

pub fn parse_file(path: &Path) -> Result<Vec<RecordedSession>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    parse_reader(BufReader::new(file))
}

/// Split the log into session blocks. Lines without a parsable leading
/// timestamp are skipped; a block with no start line is discarded.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Vec<RecordedSession>> {
    let ip_pattern = Regex::new(r"IP: (.+)").context("invalid IP pattern")?;
    let reason_pattern = Regex::new(r"Reason: (.+)").context("invalid reason pattern")?;

    let mut sessions = Vec::new();
    let mut current = RecordedSession::default();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };

        if line.contains(BLOCK_SEPARATOR) {
            if current.started.is_some() {
                sessions.push(std::mem::take(&mut current));
            } else {
                current = RecordedSession::default();
            }
            continue;
        }

        let timestamp = line
            .split(" - ")
            .next()
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp.trim(), TIMESTAMP_FORMAT).ok());
        let Some(timestamp) = timestamp else {
            continue;
        };

        if line.contains("Session started") {
            current.started = Some(timestamp);
            if let Some(capture) = ip_pattern.captures(&line) {
                current.origin = Some(capture[1].to_string());
            }
        } else if line.contains("CAPTCHA attempt") {
            current.captcha_attempts += 1;
        } else if line.contains("Session ended") {
            current.ended = Some(timestamp);
            current.success = line.contains("Success");
            if let Some(capture) = reason_pattern.captures(&line) {
                current.reason = Some(capture[1].to_string());
            }
        }
    }

    // A final block not closed by a separator still counts.
    if current.started.is_some() {
        sessions.push(current);
    }

    Ok(sessions)
}

pub fn render_report(sessions: &[RecordedSession]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total sessions: {}", sessions.len());

    let success_count = sessions.iter().filter(|s| s.success).count();
    let _ = writeln!(out, "Successful sessions: {success_count}");
    let _ = writeln!(out, "Failed sessions: {}", sessions.len() - success_count);

    let avg_captchas = if sessions.is_empty() {
        0.0
    } else {
        sessions.iter().map(|s| s.captcha_attempts).sum::<u64>() as f64 / sessions.len() as f64
    };
    let _ = writeln!(out, "Avg. CAPTCHA attempts per session: {avg_captchas:.2}");

    let _ = writeln!(out, "\nSessions per IP:");
    let per_ip = ordered_tally(sessions.iter().map(|s| s.origin.as_deref().unwrap_or("unknown")));
    for (ip, count) in per_ip {
        let _ = writeln!(out, "  {ip}: {count} session(s)");
    }

    let _ = writeln!(out, "\nReasons for failure:");
    let reasons = ordered_tally(
        sessions
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.reason.as_deref().unwrap_or("unknown")),
    );
    for (reason, count) in reasons {
        let _ = writeln!(out, "  {reason}: {count} time(s)");
    }

    out
}

/// Count values preserving first-seen order, so the report is stable across
/// re-runs.
fn ordered_tally<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, u64)> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        if !counts.contains_key(value) {
            order.push(value);
        }
        *counts.entry(value).or_insert(0) += 1;
    }
    order
        .into_iter()
        .map(|value| (value.to_string(), counts[value]))
        .collect()
}
