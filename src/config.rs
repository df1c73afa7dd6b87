use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::captcha::SolveBudget;
use crate::ocr::OcrSpaceClient;

/// Everything the bot reads at startup. Each field falls back to its
/// default when the config file omits it, so a file holding only
/// credentials is enough to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub portal_url: String,
    pub username: String,
    pub password: String,
    /// Browser-profile variant label stamped onto session events.
    pub profile_type: String,
    pub event_log_path: String,
    pub results_csv_path: String,
    /// URL fragment that identifies the logged-in landing page; its absence
    /// alongside a login URL means the session bounced.
    pub home_marker: String,
    pub ocr: OcrSettings,
    pub waits: WaitSettings,
    pub keep_alive: KeepAliveSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            portal_url: "https://www.irctc.co.in/nget/train-search".into(),
            username: String::new(),
            password: String::new(),
            profile_type: "clean".into(),
            event_log_path: "logs/session_logs.jsonl".into(),
            results_csv_path: "logs/results.csv".into(),
            home_marker: "train-search".into(),
            ocr: OcrSettings::default(),
            waits: WaitSettings::default(),
            keep_alive: KeepAliveSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub api_key: String,
    pub endpoint: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: crate::ocr::DEFAULT_ENDPOINT.into(),
        }
    }
}

/// Every external wait is a configuration value; an unbounded wait is a
/// defect, not a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub page_load_secs: u64,
    pub element_secs: u64,
    pub capture_secs: u64,
    pub ocr_secs: u64,
    pub signature_secs: u64,
    pub settle_ms: u64,
    pub typing_delay_min_ms: u64,
    pub typing_delay_max_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            page_load_secs: 20,
            element_secs: 15,
            capture_secs: 10,
            ocr_secs: 30,
            signature_secs: 5,
            settle_ms: 1500,
            typing_delay_min_ms: 50,
            typing_delay_max_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveSettings {
    pub duration_secs: u64,
    pub interval_secs: u64,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self {
            duration_secs: 120,
            interval_secs: 20,
        }
    }
}

impl BotConfig {
    /// Load from a JSON file; a missing file means pure defaults, a present
    /// but malformed file is an error (silently ignoring credentials would
    /// be worse than failing).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))
    }

    pub fn solve_budget(&self) -> SolveBudget {
        SolveBudget {
            capture_timeout: Duration::from_secs(self.waits.capture_secs),
            ocr_timeout: Duration::from_secs(self.waits.ocr_secs),
            signature_timeout: Duration::from_secs(self.waits.signature_secs),
            element_timeout: Duration::from_secs(self.waits.element_secs),
            settle_delay: Duration::from_millis(self.waits.settle_ms),
        }
    }

    pub fn ocr_client(&self) -> OcrSpaceClient {
        OcrSpaceClient::with_endpoint(&self.ocr.api_key, &self.ocr.endpoint)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.waits.page_load_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.waits.element_secs)
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(self.keep_alive.duration_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive.interval_secs)
    }
}
