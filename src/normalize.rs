//! Pixel format normalization.
//!
//! Converts a `RawFrame` in any supported wire encoding into the canonical
//! interleaved RGB layout. Dispatch is a single exhaustive match over the
//! format tag, one conversion rule per tag; adding a format means adding one
//! arm, and the compiler checks coverage.
//!
//! Every uncompressed conversion validates the payload length against the
//! declared dimensions before touching a byte. A mismatched frame is dropped
//! whole, never partially interpreted.

use image::GenericImageView;
use thiserror::Error;

use crate::frame::{CanonicalImage, PixelFormat, RawFrame};

/// Why a raw frame could not be normalized.
///
/// All variants are per-frame conditions; the caller skips the frame and the
/// pipeline keeps running.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unsupported pixel format {0}")]
    Unsupported(PixelFormat),
    #[error("{format} payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("{format} dimensions {width}x{height} overflow or are not subsample-aligned")]
    BadDimensions {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
    #[error("jpeg decode failed: {0}")]
    JpegDecode(#[from] image::ImageError),
    #[error("decoded jpeg is {actual_width}x{actual_height}, frame declared {width}x{height}")]
    JpegDimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Convert a raw frame to the canonical RGB layout.
pub fn normalize(frame: &RawFrame) -> Result<CanonicalImage, NormalizeError> {
    match frame.format {
        PixelFormat::Rgb24 => {
            check_len(frame)?;
            Ok(CanonicalImage::from_rgb(
                frame.width,
                frame.height,
                frame.data.clone(),
            ))
        }
        PixelFormat::Bgr24 => {
            check_len(frame)?;
            let mut rgb = frame.data.clone();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(CanonicalImage::from_rgb(frame.width, frame.height, rgb))
        }
        PixelFormat::Yuyv => packed_422_to_rgb(frame, Packed422::Yuyv),
        PixelFormat::Uyvy => packed_422_to_rgb(frame, Packed422::Uyvy),
        PixelFormat::Mjpeg => jpeg_to_rgb(frame),
        PixelFormat::I420 => i420_to_rgb(frame),
        PixelFormat::Nv12 => semiplanar_420_to_rgb(frame, ChromaOrder::Uv),
        PixelFormat::Nv21 => semiplanar_420_to_rgb(frame, ChromaOrder::Vu),
        PixelFormat::Gray8 | PixelFormat::Depth16 => {
            Err(NormalizeError::Unsupported(frame.format))
        }
    }
}

fn check_len(frame: &RawFrame) -> Result<(), NormalizeError> {
    let expected = frame
        .format
        .expected_len(frame.width, frame.height)
        .ok_or(NormalizeError::BadDimensions {
            format: frame.format,
            width: frame.width,
            height: frame.height,
        })?;
    if frame.data.len() != expected {
        return Err(NormalizeError::LengthMismatch {
            format: frame.format,
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

/// Chroma-subsampled layouts share chroma between pixel pairs (4:2:2) or
/// 2x2 blocks (4:2:0); odd dimensions would force an out-of-bounds chroma
/// read, so they are rejected up front.
fn check_alignment(frame: &RawFrame, even_width: bool, even_height: bool) -> Result<(), NormalizeError> {
    let misaligned =
        (even_width && frame.width % 2 != 0) || (even_height && frame.height % 2 != 0);
    if misaligned || frame.width == 0 || frame.height == 0 {
        return Err(NormalizeError::BadDimensions {
            format: frame.format,
            width: frame.width,
            height: frame.height,
        });
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Packed422 {
    Yuyv,
    Uyvy,
}

#[derive(Clone, Copy)]
enum ChromaOrder {
    Uv,
    Vu,
}

fn packed_422_to_rgb(frame: &RawFrame, order: Packed422) -> Result<CanonicalImage, NormalizeError> {
    check_alignment(frame, true, false)?;
    check_len(frame)?;
    let w = frame.width as usize;
    let h = frame.height as usize;
    let data = &frame.data;

    let mut rgb = vec![0u8; w * h * 3];
    for j in 0..h {
        for i in 0..w {
            // Two horizontally adjacent pixels share one U/V pair.
            let pair = (j * w + (i & !1)) * 2;
            let (y, u, v) = match order {
                Packed422::Yuyv => (data[(j * w + i) * 2], data[pair + 1], data[pair + 3]),
                Packed422::Uyvy => (data[(j * w + i) * 2 + 1], data[pair], data[pair + 2]),
            };
            write_rgb(&mut rgb, (j * w + i) * 3, y, u, v);
        }
    }
    Ok(CanonicalImage::from_rgb(frame.width, frame.height, rgb))
}

fn i420_to_rgb(frame: &RawFrame) -> Result<CanonicalImage, NormalizeError> {
    check_alignment(frame, true, true)?;
    check_len(frame)?;
    let w = frame.width as usize;
    let h = frame.height as usize;
    let data = &frame.data;
    let y_plane = w * h;
    let chroma_stride = w / 2;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = data[j * w + i];
            let chroma = (j / 2) * chroma_stride + i / 2;
            let u = data[y_plane + chroma];
            let v = data[y_plane + y_plane / 4 + chroma];
            write_rgb(&mut rgb, (j * w + i) * 3, y, u, v);
        }
    }
    Ok(CanonicalImage::from_rgb(frame.width, frame.height, rgb))
}

fn semiplanar_420_to_rgb(
    frame: &RawFrame,
    order: ChromaOrder,
) -> Result<CanonicalImage, NormalizeError> {
    check_alignment(frame, true, true)?;
    check_len(frame)?;
    let w = frame.width as usize;
    let h = frame.height as usize;
    let data = &frame.data;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = data[j * w + i];
            let chroma = y_plane + (j / 2) * w + (i / 2) * 2;
            let (u, v) = match order {
                ChromaOrder::Uv => (data[chroma], data[chroma + 1]),
                ChromaOrder::Vu => (data[chroma + 1], data[chroma]),
            };
            write_rgb(&mut rgb, (j * w + i) * 3, y, u, v);
        }
    }
    Ok(CanonicalImage::from_rgb(frame.width, frame.height, rgb))
}

fn jpeg_to_rgb(frame: &RawFrame) -> Result<CanonicalImage, NormalizeError> {
    let image = image::load_from_memory(&frame.data)?;
    let (actual_width, actual_height) = image.dimensions();
    if actual_width != frame.width || actual_height != frame.height {
        return Err(NormalizeError::JpegDimensionMismatch {
            width: frame.width,
            height: frame.height,
            actual_width,
            actual_height,
        });
    }
    let rgb = image.into_rgb8();
    Ok(CanonicalImage::from_rgb(
        frame.width,
        frame.height,
        rgb.into_raw(),
    ))
}

fn write_rgb(rgb: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    rgb[offset] = clamp_to_u8(r);
    rgb[offset + 1] = clamp_to_u8(g);
    rgb[offset + 2] = clamp_to_u8(b);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(format: PixelFormat, width: u32, height: u32) -> RawFrame {
        let len = format.expected_len(width, height).expect("fixed-size format");
        RawFrame::new(width, height, format, vec![128u8; len])
    }

    #[test]
    fn rgb_passes_through_unchanged() {
        let frame = RawFrame::new(2, 1, PixelFormat::Rgb24, vec![10, 20, 30, 40, 50, 60]);
        let image = normalize(&frame).unwrap();
        assert_eq!(image.pixels(), &[10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn bgr_swaps_channels() {
        let frame = RawFrame::new(1, 1, PixelFormat::Bgr24, vec![30, 20, 10]);
        let image = normalize(&frame).unwrap();
        assert_eq!(image.pixels(), &[10, 20, 30]);
    }

    #[test]
    fn gray_frames_stay_gray_in_every_yuv_layout() {
        for format in [
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
        ] {
            let image = normalize(&gray_frame(format, 4, 2)).unwrap();
            assert_eq!(image.len(), 4 * 2 * 3, "{format}");
            assert!(
                image.pixels().iter().all(|&px| px == 128),
                "{format} should map neutral YUV to (128,128,128)"
            );
        }
    }

    #[test]
    fn nv12_and_nv21_differ_only_in_chroma_order() {
        // One 2x2 block, Y=128 everywhere, chroma bytes [178, 128].
        // Read as U=178,V=128 (NV12): blue-shifted. As V=178,U=128 (NV21): red-shifted.
        let data = vec![128, 128, 128, 128, 178, 128];
        let nv12 = normalize(&RawFrame::new(2, 2, PixelFormat::Nv12, data.clone())).unwrap();
        let nv21 = normalize(&RawFrame::new(2, 2, PixelFormat::Nv21, data)).unwrap();

        assert_eq!(&nv12.pixels()[..3], &[128, 111, 217]);
        assert_eq!(&nv21.pixels()[..3], &[198, 92, 128]);
    }

    #[test]
    fn yuyv_and_uyvy_read_luma_from_the_right_byte() {
        // One pixel pair. YUYV bytes: Y0=128 U=178 Y1=60 V=128.
        let yuyv = normalize(&RawFrame::new(2, 1, PixelFormat::Yuyv, vec![128, 178, 60, 128]))
            .unwrap();
        assert_eq!(yuyv.pixels(), &[128, 111, 217, 60, 43, 149]);

        // Same pixels in UYVY ordering: U=178 Y0=128 V=128 Y1=60.
        let uyvy = normalize(&RawFrame::new(2, 1, PixelFormat::Uyvy, vec![178, 128, 128, 60]))
            .unwrap();
        assert_eq!(uyvy.pixels(), &[128, 111, 217, 60, 43, 149]);
    }

    #[test]
    fn i420_uses_separate_chroma_planes() {
        // 2x2: Y=128 x4, U plane [178], V plane [128].
        let frame = RawFrame::new(2, 2, PixelFormat::I420, vec![128, 128, 128, 128, 178, 128]);
        let image = normalize(&frame).unwrap();
        assert_eq!(&image.pixels()[..3], &[128, 111, 217]);
    }

    #[test]
    fn jpeg_frames_are_fully_decoded() {
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95);
        encoder
            .encode(&[128u8; 4 * 2 * 3], 4, 2, image::ExtendedColorType::Rgb8)
            .unwrap();

        let frame = RawFrame::new(4, 2, PixelFormat::Mjpeg, jpeg);
        let image = normalize(&frame).unwrap();
        assert_eq!(image.len(), 4 * 2 * 3);
        // JPEG is lossy; solid gray survives within a small tolerance.
        assert!(image.pixels().iter().all(|&px| (126..=130).contains(&px)));
    }

    #[test]
    fn jpeg_dimension_mismatch_is_rejected() {
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95);
        encoder
            .encode(&[128u8; 2 * 2 * 3], 2, 2, image::ExtendedColorType::Rgb8)
            .unwrap();

        let frame = RawFrame::new(8, 8, PixelFormat::Mjpeg, jpeg);
        assert!(matches!(
            normalize(&frame),
            Err(NormalizeError::JpegDimensionMismatch { .. })
        ));
    }

    #[test]
    fn garbage_jpeg_payload_fails_cleanly() {
        let frame = RawFrame::new(2, 2, PixelFormat::Mjpeg, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            normalize(&frame),
            Err(NormalizeError::JpegDecode(_))
        ));
    }

    #[test]
    fn truncated_payloads_are_dropped_for_every_fixed_size_format() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
        ] {
            let len = format.expected_len(4, 2).unwrap();
            let frame = RawFrame::new(4, 2, format, vec![128u8; len - 1]);
            assert!(
                matches!(normalize(&frame), Err(NormalizeError::LengthMismatch { .. })),
                "{format} must reject a truncated payload"
            );
        }
    }

    #[test]
    fn unsupported_formats_yield_no_image() {
        for format in [PixelFormat::Gray8, PixelFormat::Depth16] {
            let frame = gray_frame(format, 4, 2);
            assert!(matches!(
                normalize(&frame),
                Err(NormalizeError::Unsupported(f)) if f == format
            ));
        }
    }

    #[test]
    fn odd_width_subsampled_frames_are_rejected() {
        let frame = RawFrame::new(3, 2, PixelFormat::Yuyv, vec![128u8; 12]);
        assert!(matches!(
            normalize(&frame),
            Err(NormalizeError::BadDimensions { .. })
        ));
    }
}
