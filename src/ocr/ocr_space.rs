use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use log::debug;
use reqwest::Client;
use serde_json::Value;

use super::OcrEngine;
use crate::captcha::preprocess::prepare_for_ocr;

pub const DEFAULT_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// OCR.space `parse/image` client.
///
/// The captured image is preprocessed (§ `captcha::preprocess`) and uploaded
/// as a base64 data URL with engine 2, which handles the short distorted
/// strings the challenge renders better than engine 1.
pub struct OcrSpaceClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl OcrSpaceClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for OcrSpaceClient {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let prepared = prepare_for_ocr(image)?;
        let payload = format!("data:image/png;base64,{}", B64.encode(&prepared));

        let form = [
            ("apikey", self.api_key.as_str()),
            ("base64Image", payload.as_str()),
            ("language", "eng"),
            ("OCREngine", "2"),
            ("isOverlayRequired", "false"),
            ("scale", "true"),
        ];

        let response = self
            .http
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .context("OCR request failed")?;
        let body: Value = response
            .json()
            .await
            .context("OCR response was not JSON")?;

        let text = parsed_text(&body);
        debug!("OCR engine returned {} chars", text.len());
        Ok(text)
    }
}

/// Extract `ParsedResults[0].ParsedText`; any missing level means the engine
/// read nothing, which is an empty result rather than an error.
fn parsed_text(body: &Value) -> String {
    body.get("ParsedResults")
        .and_then(|results| results.get(0))
        .and_then(|first| first.get("ParsedText"))
        .and_then(|text| text.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}
