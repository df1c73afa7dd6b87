use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::record::EventKind;

/// One event as the bot emits it, before serialization.
///
/// `timestamp` is stamped at construction so an event queued briefly before
/// the write still carries the time it happened.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub event: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl LogEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event,
            reason: None,
            message: None,
            ip: None,
            profile_type: None,
            session_id: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn profile_type(mut self, profile_type: impl Into<String>) -> Self {
        self.profile_type = Some(profile_type.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Where emitted events go. The solver and login flow only see this trait;
/// production writes JSONL, tests collect in memory.
pub trait EventSink: Send + Sync {
    fn record(&self, event: LogEvent) -> Result<()>;
}

/// Append-only JSONL event log, one serialized [`LogEvent`] per line.
///
/// This is the same file the `summary` report subcommand scans.
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl EventSink for JsonlEventLog {
    fn record(&self, event: LogEvent) -> Result<()> {
        let line = serde_json::to_string(&event)?;
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.event).collect()
    }
}

impl EventSink for MemoryEventLog {
    fn record(&self, event: LogEvent) -> Result<()> {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

const RESULTS_HEADER: &str = "timestamp,status,profile_type,ip";

/// Append one outcome row to the results CSV, writing the header first if the
/// file does not exist yet.
pub fn append_result(path: &Path, status: &str, profile_type: &str, ip: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create results directory {}", parent.display()))?;
    }
    let needs_header = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open results log {}", path.display()))?;
    if needs_header {
        writeln!(file, "{RESULTS_HEADER}")?;
    }
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f");
    writeln!(file, "{timestamp},{status},{profile_type},{ip}")
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}
