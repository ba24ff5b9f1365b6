//! Frame data model.
//!
//! - `PixelFormat`: wire-level pixel encodings a camera can deliver.
//! - `RawFrame`: one captured frame plus the metadata needed to interpret it.
//! - `CanonicalImage`: the single interleaved RGB layout every raw frame is
//!   normalized to before JPEG compression.
//!
//! Raw frames are transient: a source produces one, the normalizer consumes it,
//! and nothing holds on to it afterwards.

use std::fmt;

// ----------------------------------------------------------------------------
// PixelFormat
// ----------------------------------------------------------------------------

/// Pixel encodings that can appear on a raw frame.
///
/// `Gray8` and `Depth16` are tags a depth camera genuinely advertises but the
/// color pipeline does not normalize; they take the unsupported-format path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed R-G-B, 3 bytes per pixel.
    Rgb24,
    /// Packed B-G-R, 3 bytes per pixel.
    Bgr24,
    /// Packed YUV 4:2:2, Y0-U-Y1-V ordering, 2 bytes per pixel.
    Yuyv,
    /// Packed YUV 4:2:2, U-Y0-V-Y1 ordering, 2 bytes per pixel.
    Uyvy,
    /// JPEG-compressed frame, variable length.
    Mjpeg,
    /// Planar YUV 4:2:0, separate U and V planes.
    I420,
    /// Semi-planar YUV 4:2:0, interleaved UV plane.
    Nv12,
    /// Semi-planar YUV 4:2:0, interleaved VU plane.
    Nv21,
    /// Single-channel luma, 1 byte per pixel.
    Gray8,
    /// 16-bit depth values, 2 bytes per pixel.
    Depth16,
}

impl PixelFormat {
    /// Expected raw payload length for a `width` x `height` frame.
    ///
    /// Returns `None` for compressed frames (variable length). Uses checked
    /// arithmetic so absurd dimensions surface as `None`, not a wrap-around.
    pub fn expected_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Mjpeg => None,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Yuyv | PixelFormat::Uyvy | PixelFormat::Depth16 => pixels.checked_mul(2),
            PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
                pixels.checked_add(pixels / 2)
            }
            PixelFormat::Gray8 => Some(pixels),
        }
    }

    /// Map a V4L2 FourCC code to a format tag.
    pub fn from_fourcc(repr: &[u8; 4]) -> Option<Self> {
        match repr {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"UYVY" => Some(PixelFormat::Uyvy),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            b"YU12" | b"I420" => Some(PixelFormat::I420),
            b"NV12" => Some(PixelFormat::Nv12),
            b"NV21" => Some(PixelFormat::Nv21),
            b"GREY" | b"Y800" => Some(PixelFormat::Gray8),
            b"Z16 " | b"Y16 " => Some(PixelFormat::Depth16),
            _ => None,
        }
    }

    /// The V4L2 FourCC code for this tag.
    pub fn to_fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Yuyv => *b"YUYV",
            PixelFormat::Uyvy => *b"UYVY",
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::I420 => *b"YU12",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Nv21 => *b"NV21",
            PixelFormat::Gray8 => *b"GREY",
            PixelFormat::Depth16 => *b"Z16 ",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Depth16 => "DEPTH16",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// One frame as delivered by a camera source.
///
/// The payload is owned and never mutated after capture; the normalizer reads
/// it once and the frame is dropped.
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }
}

// ----------------------------------------------------------------------------
// CanonicalImage
// ----------------------------------------------------------------------------

/// Interleaved RGB buffer, `height * width * 3` bytes.
///
/// This is the one layout the encoder accepts; the normalizer guarantees the
/// length invariant on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl CanonicalImage {
    /// Wrap an RGB buffer whose length matches the dimensions.
    ///
    /// Callers construct this only from validated conversions; the invariant is
    /// checked in debug builds.
    pub(crate) fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 3);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_len_per_format() {
        assert_eq!(PixelFormat::Rgb24.expected_len(2, 2), Some(12));
        assert_eq!(PixelFormat::Bgr24.expected_len(2, 2), Some(12));
        assert_eq!(PixelFormat::Yuyv.expected_len(2, 2), Some(8));
        assert_eq!(PixelFormat::Uyvy.expected_len(2, 2), Some(8));
        assert_eq!(PixelFormat::I420.expected_len(2, 2), Some(6));
        assert_eq!(PixelFormat::Nv12.expected_len(2, 2), Some(6));
        assert_eq!(PixelFormat::Nv21.expected_len(2, 2), Some(6));
        assert_eq!(PixelFormat::Gray8.expected_len(2, 2), Some(4));
        assert_eq!(PixelFormat::Depth16.expected_len(2, 2), Some(8));
        assert_eq!(PixelFormat::Mjpeg.expected_len(2, 2), None);
    }

    #[test]
    fn expected_len_rejects_overflow() {
        assert_eq!(PixelFormat::Rgb24.expected_len(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn fourcc_round_trip() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::Mjpeg,
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
            PixelFormat::Gray8,
            PixelFormat::Depth16,
        ] {
            assert_eq!(PixelFormat::from_fourcc(&format.to_fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }

    #[test]
    fn canonical_image_length_invariant() {
        let image = CanonicalImage::from_rgb(4, 2, vec![0u8; 24]);
        assert_eq!(image.len(), 24);
        assert!(!image.is_empty());
    }
}
