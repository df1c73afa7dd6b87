use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::{sleep, timeout, Instant};

use super::normalize::{clean_text, plausible_solution};
use super::refresh::RefreshDetector;
use crate::browser::CaptchaScreen;
use crate::events::{EventKind, EventSink, LogEvent};
use crate::metrics::{AttemptMetrics, MetricsCollector};
use crate::ocr::OcrEngine;

/// Fixed ceiling on automated attempts per login. Bounds wall-clock cost
/// against a flaky or adversarial challenge provider before handing over
/// to the operator.
pub const MAX_SOLVE_ATTEMPTS: u32 = 3;

/// Position of the solver in its attempt cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveState {
    Idle,
    Capturing,
    Recognizing,
    Validating,
    Filling,
    Rejected,
    Submitting,
    CheckingRefresh,
    Accepted,
    LoopDetected,
    ManualRequired,
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Answer filled and submitted; superseded by the refresh check.
    Filled,
    /// OCR text failed validation, nothing was submitted.
    Empty,
    /// A collaborator call failed or timed out.
    Error,
    /// The challenge image was regenerated after submit.
    Refreshed,
    /// No regenerated image appeared after submit.
    Accepted,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Filled => "filled",
            AttemptOutcome::Empty => "empty",
            AttemptOutcome::Error => "error",
            AttemptOutcome::Refreshed => "refreshed",
            AttemptOutcome::Accepted => "accepted",
        }
    }
}

/// One attempt's worth of working state. Never persisted, only logged.
#[derive(Debug, Clone)]
pub struct CaptchaAttempt {
    pub index: u32,
    pub raw_text: String,
    pub cleaned_text: String,
    pub is_valid: bool,
    pub signature_before: Option<String>,
    pub signature_after: Option<String>,
    pub outcome: AttemptOutcome,
}

impl CaptchaAttempt {
    fn new(index: u32) -> Self {
        Self {
            index,
            raw_text: String::new(),
            cleaned_text: String::new(),
            is_valid: false,
            signature_before: None,
            signature_after: None,
            outcome: AttemptOutcome::Empty,
        }
    }
}

/// Terminal result of a solve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    Accepted { attempts: u32 },
    ManualRequired,
}

/// Bounds for every external wait the solver performs. Configuration, not
/// business logic.
#[derive(Debug, Clone, Copy)]
pub struct SolveBudget {
    pub capture_timeout: Duration,
    pub ocr_timeout: Duration,
    pub signature_timeout: Duration,
    pub element_timeout: Duration,
    /// How long the provider gets to swap the image after a rejected submit.
    pub settle_delay: Duration,
}

impl Default for SolveBudget {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(10),
            ocr_timeout: Duration::from_secs(30),
            signature_timeout: Duration::from_secs(5),
            element_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Default)]
struct AttemptTimings {
    capture_ms: u64,
    ocr_ms: Option<u64>,
}

/// Drives up to [`MAX_SOLVE_ATTEMPTS`] capture → OCR → validate → submit →
/// refresh-check cycles, emitting one event per transition.
///
/// Attempts run strictly sequentially: each depends on the visible side
/// effect (image refresh) of the previous one. Collaborator failures are
/// absorbed into the attempt that suffered them.
pub struct CaptchaSolver<'a> {
    screen: &'a mut dyn CaptchaScreen,
    ocr: &'a dyn OcrEngine,
    refresh: &'a dyn RefreshDetector,
    events: &'a dyn EventSink,
    metrics: Option<&'a MetricsCollector>,
    budget: SolveBudget,
    state: SolveState,
}

impl<'a> CaptchaSolver<'a> {
    pub fn new(
        screen: &'a mut dyn CaptchaScreen,
        ocr: &'a dyn OcrEngine,
        refresh: &'a dyn RefreshDetector,
        events: &'a dyn EventSink,
        budget: SolveBudget,
    ) -> Self {
        Self {
            screen,
            ocr,
            refresh,
            events,
            metrics: None,
            budget,
            state: SolveState::Idle,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SolveState {
        self.state
    }

    /// Run the bounded attempt loop to a terminal state. Never fails:
    /// exhaustion is a state, not an error.
    pub async fn solve(&mut self) -> SolveOutcome {
        for index in 1..=MAX_SOLVE_ATTEMPTS {
            let attempt = self.run_attempt(index).await;
            debug!(
                "captcha attempt {index} finished as {}",
                attempt.outcome.as_str()
            );

            match attempt.outcome {
                AttemptOutcome::Accepted => {
                    self.state = SolveState::Accepted;
                    self.emit(
                        LogEvent::new(EventKind::CaptchaAccepted)
                            .message(format!("challenge accepted on attempt {index}")),
                    );
                    info!("captcha accepted on attempt {index}");
                    return SolveOutcome::Accepted { attempts: index };
                }
                AttemptOutcome::Refreshed => {
                    self.state = SolveState::LoopDetected;
                    self.emit(
                        LogEvent::new(EventKind::CaptchaLoopDetected)
                            .message("challenge image regenerated after submit"),
                    );
                }
                AttemptOutcome::Empty | AttemptOutcome::Error | AttemptOutcome::Filled => {}
            }
        }

        self.state = SolveState::ManualRequired;
        self.emit(
            LogEvent::new(EventKind::CaptchaManualRequired)
                .message(format!("no acceptance after {MAX_SOLVE_ATTEMPTS} attempts")),
        );
        warn!("captcha not accepted after {MAX_SOLVE_ATTEMPTS} attempts, manual entry required");
        SolveOutcome::ManualRequired
    }

    async fn run_attempt(&mut self, index: u32) -> CaptchaAttempt {
        let started = Instant::now();
        let mut timings = AttemptTimings::default();
        let attempt = self.attempt_steps(index, &mut timings).await;
        self.record_metrics(&attempt, &timings, started.elapsed())
            .await;
        attempt
    }

    async fn attempt_steps(
        &mut self,
        index: u32,
        timings: &mut AttemptTimings,
    ) -> CaptchaAttempt {
        let mut attempt = CaptchaAttempt::new(index);

        self.state = SolveState::Capturing;
        let capture_started = Instant::now();
        let image = match timeout(self.budget.capture_timeout, self.screen.capture_image()).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                return self.attempt_error(index, format!("image capture failed: {err}"), attempt)
            }
            Err(_) => {
                return self.attempt_error(
                    index,
                    format!(
                        "image capture timed out after {:?}",
                        self.budget.capture_timeout
                    ),
                    attempt,
                )
            }
        };
        timings.capture_ms = capture_started.elapsed().as_millis() as u64;

        let signature_before = match timeout(
            self.budget.signature_timeout,
            self.screen.image_signature(),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(err)) => {
                return self.attempt_error(index, format!("signature read failed: {err}"), attempt)
            }
            Err(_) => {
                return self.attempt_error(index, "signature read timed out".to_string(), attempt)
            }
        };
        attempt.signature_before = Some(signature_before.clone());

        self.state = SolveState::Recognizing;
        let ocr_started = Instant::now();
        let raw_text = match timeout(self.budget.ocr_timeout, self.ocr.recognize(&image)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                return self.attempt_error(index, format!("OCR error: {err}"), attempt)
            }
            Err(_) => {
                return self.attempt_error(
                    index,
                    format!("OCR timed out after {:?}", self.budget.ocr_timeout),
                    attempt,
                )
            }
        };
        timings.ocr_ms = Some(ocr_started.elapsed().as_millis() as u64);
        self.emit(
            LogEvent::new(EventKind::CaptchaOcrRaw)
                .message(format!("Raw OCR text: '{}'", raw_text.trim())),
        );
        attempt.raw_text = raw_text;

        self.state = SolveState::Validating;
        attempt.cleaned_text = clean_text(&attempt.raw_text);
        attempt.is_valid = plausible_solution(&attempt.cleaned_text);
        if !attempt.is_valid {
            self.state = SolveState::Rejected;
            self.emit(LogEvent::new(EventKind::CaptchaOcrInvalid).message(format!(
                "OCR returned unexpected length: {}",
                attempt.cleaned_text
            )));
            info!(
                "attempt {index}: OCR text rejected, {} chars after cleaning",
                attempt.cleaned_text.len()
            );
            attempt.outcome = AttemptOutcome::Empty;
            return attempt;
        }
        self.emit(
            LogEvent::new(EventKind::CaptchaOcrSuccess)
                .message(format!("OCR solved: {}", attempt.cleaned_text)),
        );

        self.state = SolveState::Filling;
        let field = match timeout(self.budget.element_timeout, self.screen.solution_field()).await
        {
            Ok(Ok(field)) => field,
            Ok(Err(err)) => {
                return self.attempt_error(
                    index,
                    format!("answer field lookup failed: {err}"),
                    attempt,
                )
            }
            Err(_) => {
                return self.attempt_error(index, "answer field lookup timed out".into(), attempt)
            }
        };
        match timeout(
            self.budget.element_timeout,
            self.screen.fill(&field, &attempt.cleaned_text),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return self.attempt_error(index, format!("answer fill failed: {err}"), attempt)
            }
            Err(_) => return self.attempt_error(index, "answer fill timed out".into(), attempt),
        }
        attempt.outcome = AttemptOutcome::Filled;
        self.emit(LogEvent::new(EventKind::CaptchaFilled).message(format!(
            "filled challenge answer ({} chars)",
            attempt.cleaned_text.len()
        )));

        self.state = SolveState::Submitting;
        match timeout(self.budget.element_timeout, self.screen.submit()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return self.attempt_error(index, format!("submit failed: {err}"), attempt)
            }
            Err(_) => return self.attempt_error(index, "submit timed out".into(), attempt),
        }

        // The provider needs a beat to swap the image when it rejects.
        sleep(self.budget.settle_delay).await;

        self.state = SolveState::CheckingRefresh;
        attempt.signature_after = match timeout(
            self.budget.signature_timeout,
            self.screen.image_signature(),
        )
        .await
        {
            Ok(Ok(signature)) => Some(signature),
            // No readable challenge image within the bound: nothing was
            // regenerated, which is the acceptance signal.
            _ => None,
        };

        attempt.outcome = match attempt.signature_after.as_deref() {
            Some(after) if self.refresh.changed(&signature_before, after) => {
                AttemptOutcome::Refreshed
            }
            _ => AttemptOutcome::Accepted,
        };
        attempt
    }

    fn attempt_error(
        &mut self,
        index: u32,
        detail: String,
        mut attempt: CaptchaAttempt,
    ) -> CaptchaAttempt {
        warn!("captcha attempt {index} failed: {detail}");
        self.emit(
            LogEvent::new(EventKind::CaptchaOcrException)
                .message(format!("attempt {index}: {detail}")),
        );
        attempt.outcome = AttemptOutcome::Error;
        attempt
    }

    async fn record_metrics(
        &self,
        attempt: &CaptchaAttempt,
        timings: &AttemptTimings,
        total: Duration,
    ) {
        let Some(metrics) = self.metrics else {
            return;
        };
        let (cpu_percent, memory_mb) = metrics.sample_system_metrics().await;
        metrics
            .record_attempt(AttemptMetrics {
                timestamp: Utc::now(),
                attempt: attempt.index,
                capture_ms: timings.capture_ms,
                ocr_ms: timings.ocr_ms,
                outcome: attempt.outcome.as_str().to_string(),
                total_ms: total.as_millis() as u64,
                cpu_percent,
                memory_mb,
            })
            .await;
    }

    fn emit(&self, event: LogEvent) {
        if let Err(err) = self.events.record(event) {
            warn!("failed to record solver event: {err}");
        }
    }
}
