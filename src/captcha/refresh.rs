use anyhow::{Context, Result};
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Decides whether a post-submit image signature means the provider rejected
/// the answer and regenerated the challenge.
///
/// The target system gives no explicit rejection signal, so "did the image
/// change" stands in for "was the submission rejected". That proxy breaks
/// if the provider rotates images even on success, which is why this is a
/// policy and not a hardwired comparison.
pub trait RefreshDetector: Send + Sync {
    fn changed(&self, before: &str, after: &str) -> bool;
}

/// Plain inequality of opaque signature tokens (image source references).
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureChange;

impl RefreshDetector for SignatureChange {
    fn changed(&self, before: &str, after: &str) -> bool {
        before != after
    }
}

const DEFAULT_DISTANCE_THRESHOLD: u32 = 8;

/// Treats signatures as perceptual hashes and only counts a refresh when the
/// hamming distance crosses a threshold, for providers that re-encode the
/// same challenge on every load.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualChange {
    threshold: u32,
}

impl PerceptualChange {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl Default for PerceptualChange {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_THRESHOLD)
    }
}

impl RefreshDetector for PerceptualChange {
    fn changed(&self, before: &str, after: &str) -> bool {
        hamming_distance(before, after) >= self.threshold
    }
}

/// Perceptual hash of an image, base64-encoded; drivers that cannot expose
/// a stable source reference can use this as their signature token.
pub fn perceptual_signature(image_bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(image_bytes)
        .context("challenge image failed to decode for hashing")?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();
    Ok(hasher.hash_image(&img).to_base64())
}

/// Distance between two base64 hashes; unparseable input saturates so a
/// malformed signature always reads as "changed".
pub fn hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_with_stripe(stripe_at: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(32, 32, |x, _| {
            if x >= stripe_at && x < stripe_at + 8 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn signature_change_is_plain_inequality() {
        let policy = SignatureChange;
        assert!(!policy.changed("blob:abc", "blob:abc"));
        assert!(policy.changed("blob:abc", "blob:def"));
    }

    #[test]
    fn identical_images_hash_identically() {
        let a = perceptual_signature(&png_with_stripe(4)).unwrap();
        let b = perceptual_signature(&png_with_stripe(4)).unwrap();
        assert_eq!(a, b);
        assert_eq!(hamming_distance(&a, &b), 0);
        assert!(!PerceptualChange::default().changed(&a, &b));
    }

    #[test]
    fn different_images_cross_the_distance_threshold() {
        let a = perceptual_signature(&png_with_stripe(2)).unwrap();
        let b = perceptual_signature(&png_with_stripe(20)).unwrap();
        assert!(PerceptualChange::new(1).changed(&a, &b));
    }

    #[test]
    fn malformed_hashes_always_read_as_changed() {
        assert_eq!(hamming_distance("???", "???"), u32::MAX);
        assert!(PerceptualChange::default().changed("???", "also not base64"));
    }
}
