use std::{future::Future, path::Path, time::Duration};

use anyhow::Result;
use log::{info, warn};
use rand::Rng;
use tokio::time::{sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::browser::{CaptchaScreen, DriverError, FieldRef, Portal};
use crate::captcha::{CaptchaSolver, RefreshDetector, SolveOutcome};
use crate::config::BotConfig;
use crate::events::{append_result, EventKind, EventSink, LogEvent};
use crate::metrics::MetricsCollector;
use crate::ocr::OcrEngine;

const IP_LOOKUP_URL: &str = "https://api.ipify.org";

/// Resolve the machine's public address for stamping session events.
/// Failure degrades to `None`; the caller falls back to `unknown`.
pub async fn lookup_public_ip(bound: Duration) -> Option<String> {
    let request = reqwest::Client::new().get(IP_LOOKUP_URL).send();
    match timeout(bound, request).await {
        Ok(Ok(response)) => match response.text().await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// How a login run ended. Each variant maps onto the `reason` carried by
/// the terminating event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Logged in and the keep-alive window ran to its configured end.
    Completed,
    /// The portal bounced the session while it was being held.
    SessionExpired,
    /// The operator closed the browser while the session was held.
    UserClosed,
    /// Automated solving exhausted its attempts; the operator must finish.
    ManualRequired,
    /// Cancelled from outside mid-run.
    Interrupted,
}

impl LoginOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Completed => "completed",
            LoginOutcome::SessionExpired => "session_expired",
            LoginOutcome::UserClosed => "user_closed",
            LoginOutcome::ManualRequired => "manual_required",
            LoginOutcome::Interrupted => "interrupted",
        }
    }
}

const REASON_LOGIN_FAILED: &str = "login_failed";

/// Drives one login session end to end: portal, banner, credentials, the
/// CAPTCHA solver, then a bounded keep-alive hold.
///
/// Every run path — success, manual fallback, failure, cancellation — emits
/// exactly one terminating event and appends one results row, so the
/// aggregator can account for the session either way.
pub struct LoginFlow<'a, D> {
    driver: &'a mut D,
    ocr: &'a dyn OcrEngine,
    refresh: &'a dyn RefreshDetector,
    events: &'a dyn EventSink,
    metrics: MetricsCollector,
    config: &'a BotConfig,
}

impl<'a, D> LoginFlow<'a, D>
where
    D: Portal + CaptchaScreen,
{
    pub fn new(
        driver: &'a mut D,
        ocr: &'a dyn OcrEngine,
        refresh: &'a dyn RefreshDetector,
        events: &'a dyn EventSink,
        config: &'a BotConfig,
    ) -> Self {
        Self {
            driver,
            ocr,
            refresh,
            events,
            metrics: MetricsCollector::new(),
            config,
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Run one session. `origin` of `None` triggers a public-IP lookup;
    /// cancellation abandons the in-flight step without cleanup guarantees
    /// beyond the driver's own, but still terminates the session on record.
    pub async fn run(
        &mut self,
        origin: Option<String>,
        cancel: CancellationToken,
    ) -> Result<LoginOutcome> {
        let session_id = Uuid::new_v4().to_string();
        let origin = match origin {
            Some(origin) => origin,
            None => lookup_public_ip(self.config.page_load_timeout())
                .await
                .unwrap_or_else(|| "unknown".to_string()),
        };

        self.emit(
            LogEvent::new(EventKind::SessionStart)
                .ip(origin.clone())
                .profile_type(self.config.profile_type.clone())
                .session_id(session_id.clone()),
        );
        info!("session {session_id} started from {origin}");

        let result = tokio::select! {
            result = self.run_steps() => result,
            _ = cancel.cancelled() => {
                warn!("cancellation requested, abandoning in-flight step");
                Ok(LoginOutcome::Interrupted)
            }
        };

        let reason = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => REASON_LOGIN_FAILED,
        };
        self.emit(
            LogEvent::new(EventKind::SessionTerminated)
                .reason(reason)
                .session_id(session_id.clone()),
        );
        if let Err(err) = append_result(
            Path::new(&self.config.results_csv_path),
            reason,
            &self.config.profile_type,
            &origin,
        ) {
            warn!("failed to append results row: {err}");
        }

        let snapshot = self.metrics.get_snapshot().await;
        if let Ok(json) = serde_json::to_string(&snapshot) {
            info!("session {session_id} metrics: {json}");
        }

        result
    }

    async fn run_steps(&mut self) -> Result<LoginOutcome> {
        let page_timeout = self.config.page_load_timeout();
        let element_timeout = self.config.element_timeout();

        bounded(page_timeout, "portal load", self.driver.open_portal()).await?;

        // The promo banner comes and goes; absence is not a failure.
        match timeout(element_timeout, self.driver.dismiss_banner()).await {
            Ok(Ok(true)) => info!("dismissed promotional banner"),
            Ok(Ok(false)) => info!("no promotional banner present"),
            Ok(Err(err)) => info!("banner dismissal skipped: {err}"),
            Err(_) => info!("banner dismissal skipped: not found in time"),
        }

        bounded(
            element_timeout,
            "login dialog",
            self.driver.open_login_dialog(),
        )
        .await?;

        let username = self.config.username.clone();
        let password = self.config.password.clone();
        let field = bounded(
            element_timeout,
            "username field",
            self.driver.username_field(),
        )
        .await?;
        self.type_like_human(&field, &username).await?;
        let field = bounded(
            element_timeout,
            "password field",
            self.driver.password_field(),
        )
        .await?;
        self.type_like_human(&field, &password).await?;
        info!("credentials filled");

        let captcha_present = bounded(
            element_timeout,
            "captcha probe",
            self.driver.captcha_present(),
        )
        .await?;
        if captcha_present {
            self.emit(
                LogEvent::new(EventKind::CaptchaDetected)
                    .message("captcha challenge present on login dialog"),
            );

            let budget = self.config.solve_budget();
            let outcome = {
                let mut solver = CaptchaSolver::new(
                    &mut *self.driver,
                    self.ocr,
                    self.refresh,
                    self.events,
                    budget,
                )
                .with_metrics(&self.metrics);
                solver.solve().await
            };

            match outcome {
                // solver already submitted the accepted answer
                SolveOutcome::Accepted { attempts } => {
                    info!("captcha solved automatically after {attempts} attempt(s)")
                }
                SolveOutcome::ManualRequired => return Ok(LoginOutcome::ManualRequired),
            }
        } else {
            bounded(element_timeout, "sign in", self.driver.sign_in()).await?;
        }

        info!(
            "holding session for {:?}",
            self.config.keep_alive_duration()
        );
        Ok(self.keep_alive().await)
    }

    /// Periodic scroll jiggle so the portal sees activity, with URL checks
    /// to notice when the session has concluded underneath us.
    async fn keep_alive(&mut self) -> LoginOutcome {
        let deadline = Instant::now() + self.config.keep_alive_duration();
        let mut ticker = tokio::time::interval(self.config.keep_alive_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if Instant::now() >= deadline {
                return LoginOutcome::Completed;
            }
            ticker.tick().await;
            if Instant::now() >= deadline {
                return LoginOutcome::Completed;
            }

            for delta in [200i64, -100] {
                if let Err(err) = self.driver.scroll_by(delta).await {
                    return self.keep_alive_failure(err);
                }
            }

            match self.driver.current_url().await {
                Ok(url) => {
                    if self.session_concluded(&url) {
                        info!("session concluded based on URL change: {url}");
                        return LoginOutcome::SessionExpired;
                    }
                }
                Err(err) => return self.keep_alive_failure(err),
            }
        }
    }

    fn keep_alive_failure(&self, err: DriverError) -> LoginOutcome {
        match err {
            DriverError::ConnectionLost { .. } => {
                info!("browser gone while holding session; closed by the operator");
                LoginOutcome::UserClosed
            }
            other => {
                warn!("keep-alive step failed, ending session hold: {other}");
                LoginOutcome::SessionExpired
            }
        }
    }

    fn session_concluded(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.contains("session-expired")
            || (lower.contains("login")
                && !lower.contains(&self.config.home_marker.to_ascii_lowercase()))
    }

    /// Type character by character with a randomized inter-key delay.
    async fn type_like_human(&mut self, field: &FieldRef, text: &str) -> Result<()> {
        let element_timeout = self.config.element_timeout();
        let min = self.config.waits.typing_delay_min_ms;
        let max = self.config.waits.typing_delay_max_ms;

        let mut buffer = [0u8; 4];
        for ch in text.chars() {
            let keystroke: &str = ch.encode_utf8(&mut buffer);
            bounded(
                element_timeout,
                "keystroke",
                self.driver.type_text(field, keystroke),
            )
            .await?;

            let delay = if max > min {
                rand::thread_rng().gen_range(min..=max)
            } else {
                min
            };
            if delay > 0 {
                sleep(Duration::from_millis(delay)).await;
            }
        }
        Ok(())
    }

    fn emit(&self, event: LogEvent) {
        if let Err(err) = self.events.record(event) {
            warn!("failed to record login event: {err}");
        }
    }
}

/// Wrap a driver call in its configured bound; both the driver's own error
/// and the elapsed bound surface as step failures.
async fn bounded<T>(
    bound: Duration,
    what: &str,
    operation: impl Future<Output = Result<T, DriverError>>,
) -> Result<T> {
    match timeout(bound, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context(format!("{what} failed"))),
        Err(_) => Err(anyhow::anyhow!("{what} timed out after {bound:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::SignatureChange;
    use crate::events::MemoryEventLog;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct FakeDriver {
        captcha_present: bool,
        signature: String,
        urls: VecDeque<String>,
        typed: Vec<String>,
        fill_values: Vec<String>,
        sign_in_calls: u32,
        submit_calls: u32,
        hang_on_open: bool,
        lose_connection_on_scroll: bool,
        fail_username_lookup: bool,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                captcha_present: true,
                signature: "sig-stable".into(),
                urls: VecDeque::new(),
                typed: Vec::new(),
                fill_values: Vec::new(),
                sign_in_calls: 0,
                submit_calls: 0,
                hang_on_open: false,
                lose_connection_on_scroll: false,
                fail_username_lookup: false,
            }
        }

        fn typed_text(&self) -> String {
            self.typed.concat()
        }
    }

    #[async_trait]
    impl Portal for FakeDriver {
        async fn open_portal(&mut self) -> Result<(), DriverError> {
            if self.hang_on_open {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn dismiss_banner(&mut self) -> Result<bool, DriverError> {
            Ok(false)
        }

        async fn open_login_dialog(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn username_field(&mut self) -> Result<FieldRef, DriverError> {
            if self.fail_username_lookup {
                return Err(DriverError::ElementNotFound {
                    selector: "input[user]".into(),
                });
            }
            Ok(FieldRef("user".into()))
        }

        async fn password_field(&mut self) -> Result<FieldRef, DriverError> {
            Ok(FieldRef("pass".into()))
        }

        async fn type_text(&mut self, _field: &FieldRef, text: &str) -> Result<(), DriverError> {
            self.typed.push(text.to_string());
            Ok(())
        }

        async fn captcha_present(&mut self) -> Result<bool, DriverError> {
            Ok(self.captcha_present)
        }

        async fn sign_in(&mut self) -> Result<(), DriverError> {
            self.sign_in_calls += 1;
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String, DriverError> {
            Ok(self
                .urls
                .pop_front()
                .unwrap_or_else(|| "https://portal.example/train-search".into()))
        }

        async fn scroll_by(&mut self, _delta_y: i64) -> Result<(), DriverError> {
            if self.lose_connection_on_scroll {
                return Err(DriverError::ConnectionLost {
                    detail: "window closed".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CaptchaScreen for FakeDriver {
        async fn capture_image(&mut self) -> Result<Vec<u8>, DriverError> {
            Ok(vec![0u8; 4])
        }

        async fn image_signature(&mut self) -> Result<String, DriverError> {
            Ok(self.signature.clone())
        }

        async fn solution_field(&mut self) -> Result<FieldRef, DriverError> {
            Ok(FieldRef("captcha".into()))
        }

        async fn fill(&mut self, _field: &FieldRef, text: &str) -> Result<(), DriverError> {
            self.fill_values.push(text.to_string());
            Ok(())
        }

        async fn submit(&mut self) -> Result<(), DriverError> {
            self.submit_calls += 1;
            Ok(())
        }
    }

    struct FixedOcr {
        text: String,
    }

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize(&self, _image: &[u8]) -> Result<String> {
            Ok(self.text.clone())
        }
    }

    fn test_config(dir: &Path) -> BotConfig {
        let mut config = BotConfig::default();
        config.username = "traveler".into();
        config.password = "secret".into();
        config.results_csv_path = dir
            .join("results.csv")
            .to_string_lossy()
            .into_owned();
        config.waits.typing_delay_min_ms = 0;
        config.waits.typing_delay_max_ms = 0;
        config.waits.settle_ms = 1;
        config.keep_alive.duration_secs = 0;
        config
    }

    fn terminated_reasons(events: &MemoryEventLog) -> Vec<String> {
        events
            .events()
            .iter()
            .filter(|e| e.event == EventKind::SessionTerminated)
            .filter_map(|e| e.reason.clone())
            .collect()
    }

    #[tokio::test]
    async fn successful_run_terminates_once_with_completed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Completed);
        assert_eq!(driver.typed_text(), "travelersecret");
        assert_eq!(driver.fill_values, vec!["AB12C".to_string()]);
        // the solver's submit is the sign-in; no second click
        assert_eq!(driver.submit_calls, 1);
        assert_eq!(driver.sign_in_calls, 0);

        let kinds = events.kinds();
        assert_eq!(kinds.first(), Some(&EventKind::SessionStart));
        assert_eq!(kinds.last(), Some(&EventKind::SessionTerminated));
        assert!(kinds.contains(&EventKind::CaptchaDetected));
        assert_eq!(terminated_reasons(&events), vec!["completed".to_string()]);

        let csv = std::fs::read_to_string(dir.path().join("results.csv")).unwrap();
        assert!(csv.lines().nth(1).unwrap().contains("completed,clean,10.0.0.7"));
    }

    #[tokio::test]
    async fn manual_fallback_terminates_with_manual_required() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        let ocr = FixedOcr { text: "xx".into() };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::ManualRequired);
        assert!(driver.fill_values.is_empty());
        assert_eq!(
            terminated_reasons(&events),
            vec!["manual_required".to_string()]
        );
        assert!(events.kinds().contains(&EventKind::CaptchaManualRequired));
    }

    #[tokio::test]
    async fn no_captcha_path_clicks_sign_in_directly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        driver.captcha_present = false;
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Completed);
        assert_eq!(driver.sign_in_calls, 1);
        assert_eq!(driver.submit_calls, 0);
        assert!(!events.kinds().contains(&EventKind::CaptchaDetected));
    }

    #[tokio::test]
    async fn cancellation_terminates_with_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        driver.hang_on_open = true;
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), cancel)
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Interrupted);
        assert_eq!(
            terminated_reasons(&events),
            vec!["interrupted".to_string()]
        );
    }

    #[tokio::test]
    async fn lost_browser_during_keep_alive_reads_as_user_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.keep_alive.duration_secs = 30;
        let mut driver = FakeDriver::new();
        driver.lose_connection_on_scroll = true;
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::UserClosed);
        assert_eq!(
            terminated_reasons(&events),
            vec!["user_closed".to_string()]
        );
    }

    #[tokio::test]
    async fn expiry_url_during_keep_alive_reads_as_session_expired() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.keep_alive.duration_secs = 30;
        let mut driver = FakeDriver::new();
        driver
            .urls
            .push_back("https://portal.example/session-expired".into());
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let outcome = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::SessionExpired);
        assert_eq!(
            terminated_reasons(&events),
            vec!["session_expired".to_string()]
        );
    }

    #[tokio::test]
    async fn driver_failure_still_terminates_the_session_on_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        driver.fail_username_lookup = true;
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;

        let mut flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);
        let result = flow
            .run(Some("10.0.0.7".into()), CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(
            terminated_reasons(&events),
            vec!["login_failed".to_string()]
        );
        let csv = std::fs::read_to_string(dir.path().join("results.csv")).unwrap();
        assert!(csv.contains("login_failed"));
    }

    #[test]
    fn url_conclusion_heuristic_matches_the_portal_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut driver = FakeDriver::new();
        let ocr = FixedOcr {
            text: "AB12C".into(),
        };
        let events = MemoryEventLog::new();
        let refresh = SignatureChange;
        let flow = LoginFlow::new(&mut driver, &ocr, &refresh, &events, &config);

        assert!(flow.session_concluded("https://portal.example/session-expired"));
        assert!(flow.session_concluded("https://portal.example/nget/login"));
        // login fragment on the landing page itself does not count
        assert!(!flow.session_concluded("https://portal.example/nget/train-search?login=1"));
        assert!(!flow.session_concluded("https://portal.example/nget/train-search"));
    }
}
