//! Narrow interface to the web-automation driver.
//!
//! The real driver (page rendering, element lookup, screenshots, stealth
//! configuration) lives outside this crate. The solver and login flow only
//! ever touch these traits, so they can be exercised against in-memory
//! fakes and the driver can be swapped without touching the core.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the driver boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The requested element was not found on the page.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// An external wait expired. Every driver wait must be bounded.
    #[error("wait for {what} timed out after {duration:?}")]
    Timeout { what: String, duration: Duration },

    /// The browser went away (window closed, process gone).
    #[error("browser connection lost: {detail}")]
    ConnectionLost { detail: String },

    /// Anything else the driver could not express.
    #[error("driver failure: {detail}")]
    Other { detail: String },
}

/// Opaque handle to an input element, valid only against the driver that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef(pub String);

/// The surface the CAPTCHA solver drives: capture the challenge image,
/// fill the answer, submit, and read an opaque signature of the currently
/// displayed image (a source reference or hash) for refresh detection.
#[async_trait]
pub trait CaptchaScreen: Send {
    async fn capture_image(&mut self) -> Result<Vec<u8>, DriverError>;

    /// Opaque token identifying the currently displayed challenge image.
    async fn image_signature(&mut self) -> Result<String, DriverError>;

    async fn solution_field(&mut self) -> Result<FieldRef, DriverError>;

    async fn fill(&mut self, field: &FieldRef, text: &str) -> Result<(), DriverError>;

    async fn submit(&mut self) -> Result<(), DriverError>;
}

/// The surface the login flow drives on top of [`CaptchaScreen`].
#[async_trait]
pub trait Portal: Send {
    async fn open_portal(&mut self) -> Result<(), DriverError>;

    /// Dismiss the promotional banner if present. `Ok(false)` means there
    /// was nothing to dismiss.
    async fn dismiss_banner(&mut self) -> Result<bool, DriverError>;

    async fn open_login_dialog(&mut self) -> Result<(), DriverError>;

    async fn username_field(&mut self) -> Result<FieldRef, DriverError>;

    async fn password_field(&mut self) -> Result<FieldRef, DriverError>;

    /// Type text into a field as keystrokes, appending to what is there.
    async fn type_text(&mut self, field: &FieldRef, text: &str) -> Result<(), DriverError>;

    async fn captcha_present(&mut self) -> Result<bool, DriverError>;

    async fn sign_in(&mut self) -> Result<(), DriverError>;

    async fn current_url(&mut self) -> Result<String, DriverError>;

    async fn scroll_by(&mut self, delta_y: i64) -> Result<(), DriverError>;
}
