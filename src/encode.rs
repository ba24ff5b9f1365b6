//! JPEG encoding of canonical images.
//!
//! Compression quality is fixed at construction, never content-adaptive, so a
//! given image always produces the same payload. An image that cannot be
//! encoded is a per-frame error the caller skips, never a crash.

use anyhow::{bail, Context, Result};

use crate::frame::CanonicalImage;

/// Default compression quality (0-100).
pub const JPEG_QUALITY: u8 = 95;

/// Compresses canonical RGB images into self-describing JPEG payloads.
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::with_quality(JPEG_QUALITY)
    }

    pub fn with_quality(quality: u8) -> Self {
        Self { quality }
    }

    /// Encode one image. The payload carries its own header; nothing else is
    /// needed to decode it on the other end.
    pub fn encode(&self, image: &CanonicalImage) -> Result<Vec<u8>> {
        if image.is_empty() || image.width == 0 || image.height == 0 {
            bail!(
                "refusing to encode empty image ({}x{}, {} bytes)",
                image.width,
                image.height,
                image.len()
            );
        }

        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder
            .encode(
                image.pixels(),
                image.width,
                image.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("jpeg encode")?;
        Ok(jpeg)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, RawFrame};
    use crate::normalize::normalize;

    #[test]
    fn gray_image_encodes_to_a_jpeg_payload() {
        let frame = RawFrame::new(16, 8, PixelFormat::Rgb24, vec![128u8; 16 * 8 * 3]);
        let image = normalize(&frame).unwrap();

        let payload = FrameEncoder::new().encode(&image).unwrap();
        assert!(!payload.is_empty());
        // JPEG SOI marker; the payload is self-describing.
        assert_eq!(payload[..2], [0xFF, 0xD8]);
    }

    #[test]
    fn encoding_is_deterministic() {
        let frame = RawFrame::new(16, 8, PixelFormat::Rgb24, vec![77u8; 16 * 8 * 3]);
        let image = normalize(&frame).unwrap();

        let encoder = FrameEncoder::new();
        assert_eq!(encoder.encode(&image).unwrap(), encoder.encode(&image).unwrap());
    }

    #[test]
    fn empty_image_is_a_skip_not_a_crash() {
        let frame = RawFrame::new(0, 0, PixelFormat::Rgb24, Vec::new());
        let image = normalize(&frame).unwrap();
        assert!(FrameEncoder::new().encode(&image).is_err());
    }
}
