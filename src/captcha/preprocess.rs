use std::io::Cursor;

use anyhow::{Context, Result};
use image::{imageops, DynamicImage, ImageFormat};

const UPSCALE_FACTOR: u32 = 2;
const CONTRAST_BOOST: f32 = 60.0;
const BINARY_THRESHOLD: u8 = 150;

/// Flatten a captured challenge image into the high-contrast black/white
/// form the OCR engine reads best: grayscale, 2x upscale, contrast boost,
/// then a hard binary threshold.
pub fn prepare_for_ocr(image_bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(image_bytes)
        .context("captured challenge image failed to decode")?;

    let gray = decoded.to_luma8();
    let (width, height) = gray.dimensions();
    let scaled = imageops::resize(
        &gray,
        width * UPSCALE_FACTOR,
        height * UPSCALE_FACTOR,
        imageops::FilterType::Lanczos3,
    );

    let mut boosted = imageops::contrast(&scaled, CONTRAST_BOOST);
    for pixel in boosted.pixels_mut() {
        pixel.0[0] = if pixel.0[0] >= BINARY_THRESHOLD { u8::MAX } else { 0 };
    }

    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(boosted)
        .write_to(&mut encoded, ImageFormat::Png)
        .context("failed to encode preprocessed challenge image")?;
    Ok(encoded.into_inner())
}
