mod ocr_space;

pub use ocr_space::{OcrSpaceClient, DEFAULT_ENDPOINT};

use anyhow::Result;
use async_trait::async_trait;

/// Text recognition over a captured challenge image.
///
/// Implementations return whatever the engine read — possibly empty, never
/// null — and only fail on transport-level problems. Cleaning and
/// acceptance of the text is the solver's job.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}
