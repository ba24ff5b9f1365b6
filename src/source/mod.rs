//! Camera frame sources.
//!
//! Three device variants share one capability contract (`open`, `next_frame`
//! with a bounded wait, `close`):
//! - `UsbSource`: a plain USB camera addressed by device index; blocking
//!   capture with no explicit timeout.
//! - `DepthSource`: the local depth-camera pipeline; negotiates the closest
//!   supported capture profile at open time and falls back to the device
//!   default rather than failing.
//! - `NetSource`: a network-attached depth-camera pipeline; unreachable at
//!   open time is fatal because nothing can recover before the first frame.
//!
//! The set is closed, so dispatch is an enum match rather than trait objects.
//! Every variant also has a synthetic `stub://` backend so the pipeline can be
//! exercised without hardware; real device backends are feature-gated
//! (`camera-v4l2`, `camera-net`).
//!
//! Delivery is FIFO per source with no buffering beyond the driver's own.

mod depth;
mod net;
mod usb;

pub use depth::{negotiate_profile, DepthConfig, DepthSource, Negotiated};
pub use net::{NetConfig, NetSource, CONTROL_PORT};
pub use usb::{UsbConfig, UsbSource};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::frame::{PixelFormat, RawFrame};

// ----------------------------------------------------------------------------
// Capture profiles and resolution presets
// ----------------------------------------------------------------------------

/// One (width, height, format, rate) tuple a device advertises as supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureProfile {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
}

impl fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} @ {}fps",
            self.width, self.height, self.format, self.fps
        )
    }
}

/// Named capture resolutions exposed on the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ResolutionPreset {
    /// 1280x720
    Hd720,
    /// 1280x960
    Hd960,
    /// 1920x1080
    Hd1080,
    /// 2560x1440
    Wqhd,
    /// 3840x2160
    Uhd4k,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionPreset::Hd720 => (1280, 720),
            ResolutionPreset::Hd960 => (1280, 960),
            ResolutionPreset::Hd1080 => (1920, 1080),
            ResolutionPreset::Wqhd => (2560, 1440),
            ResolutionPreset::Uhd4k => (3840, 2160),
        }
    }
}

// ----------------------------------------------------------------------------
// Camera selection
// ----------------------------------------------------------------------------

/// Which camera the pipeline captures from, as written on the CLI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSelector {
    /// USB camera by device index ("0", "2", ...).
    Usb(u32),
    /// Local depth-camera pipeline ("depth").
    Depth,
    /// Network-attached depth-camera pipeline ("net://HOST").
    Net(String),
    /// Synthetic camera for benches and tests ("stub://NAME").
    Stub(String),
}

impl FromStr for CameraSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<u32>() {
            return Ok(CameraSelector::Usb(index));
        }
        if s == "depth" {
            return Ok(CameraSelector::Depth);
        }
        if let Some(host) = s.strip_prefix("net://") {
            if host.is_empty() {
                return Err("net:// selector is missing a host".into());
            }
            return Ok(CameraSelector::Net(host.to_string()));
        }
        if let Some(name) = s.strip_prefix("stub://") {
            return Ok(CameraSelector::Stub(name.to_string()));
        }
        Err(format!(
            "unrecognized camera selector '{s}'; expected an index, 'depth', 'net://HOST' or 'stub://NAME'"
        ))
    }
}

impl fmt::Display for CameraSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSelector::Usb(index) => write!(f, "{index}"),
            CameraSelector::Depth => f.write_str("depth"),
            CameraSelector::Net(host) => write!(f, "net://{host}"),
            CameraSelector::Stub(name) => write!(f, "stub://{name}"),
        }
    }
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

/// The closed set of frame source variants behind one contract.
pub enum FrameSource {
    Usb(UsbSource),
    Depth(DepthSource),
    Net(NetSource),
}

impl FrameSource {
    /// Open the source named by the selector, requesting `profile`.
    ///
    /// A `stub://` selector opens a synthetic depth pipeline so every stage
    /// downstream behaves exactly as with hardware attached.
    pub fn open(selector: &CameraSelector, profile: CaptureProfile) -> Result<Self> {
        match selector {
            CameraSelector::Usb(index) => Ok(FrameSource::Usb(UsbSource::open(UsbConfig {
                device: index.to_string(),
                width: profile.width,
                height: profile.height,
            })?)),
            CameraSelector::Depth => Ok(FrameSource::Depth(DepthSource::open(DepthConfig {
                device: "auto".to_string(),
                profile,
            })?)),
            CameraSelector::Net(host) => Ok(FrameSource::Net(NetSource::open(NetConfig {
                host: host.clone(),
                profile,
            })?)),
            CameraSelector::Stub(name) => Ok(FrameSource::Depth(DepthSource::open(DepthConfig {
                device: format!("stub://{name}"),
                profile,
            })?)),
        }
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` is a timeout or a transiently missing frame, not an error;
    /// the caller retries on the next iteration. The USB variant captures
    /// synchronously and ignores the timeout.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        match self {
            FrameSource::Usb(source) => source.next_frame(),
            FrameSource::Depth(source) => source.next_frame(timeout),
            FrameSource::Net(source) => source.next_frame(timeout),
        }
    }

    /// Release the device handle. Safe to call more than once.
    pub fn close(&mut self) {
        match self {
            FrameSource::Usb(source) => source.close(),
            FrameSource::Depth(source) => source.close(),
            FrameSource::Net(source) => source.close(),
        }
    }

    /// Human-readable identity for logs.
    pub fn describe(&self) -> String {
        match self {
            FrameSource::Usb(source) => source.describe(),
            FrameSource::Depth(source) => source.describe(),
            FrameSource::Net(source) => source.describe(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic frame generation (shared by the stub backends)
// ----------------------------------------------------------------------------

/// Deterministic pixel payload for a synthetic frame.
///
/// Luma drifts with the frame counter so consecutive frames differ; chroma is
/// neutral, which keeps every YUV layout decodable to a flat gray and makes
/// converted output easy to assert on.
pub(crate) fn synthetic_pixels(
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
) -> Vec<u8> {
    let len = format
        .expected_len(width, height)
        .expect("synthetic profiles use fixed-size formats");
    let luma = 96 + (frame_count % 64) as u8;
    match format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8 => vec![luma; len],
        PixelFormat::Yuyv | PixelFormat::Uyvy => {
            let mut data = vec![128u8; len];
            let luma_offset = match format {
                PixelFormat::Uyvy => 1,
                _ => 0,
            };
            for px in data.chunks_exact_mut(2) {
                px[luma_offset] = luma;
            }
            data
        }
        PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let y_plane = (width * height) as usize;
            let mut data = vec![128u8; len];
            data[..y_plane].fill(luma);
            data
        }
        PixelFormat::Depth16 => vec![0u8; len],
        PixelFormat::Mjpeg => unreachable!("synthetic profiles use fixed-size formats"),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn selector_parsing() {
        assert_eq!("0".parse(), Ok(CameraSelector::Usb(0)));
        assert_eq!("12".parse(), Ok(CameraSelector::Usb(12)));
        assert_eq!("depth".parse(), Ok(CameraSelector::Depth));
        assert_eq!(
            "net://10.9.11.10".parse(),
            Ok(CameraSelector::Net("10.9.11.10".to_string()))
        );
        assert_eq!(
            "stub://bench".parse(),
            Ok(CameraSelector::Stub("bench".to_string()))
        );
        assert!("rtsp://cam".parse::<CameraSelector>().is_err());
        assert!("net://".parse::<CameraSelector>().is_err());
    }

    #[test]
    fn presets_match_the_supported_resolutions() {
        assert_eq!(ResolutionPreset::Hd720.dimensions(), (1280, 720));
        assert_eq!(ResolutionPreset::Hd960.dimensions(), (1280, 960));
        assert_eq!(ResolutionPreset::Hd1080.dimensions(), (1920, 1080));
        assert_eq!(ResolutionPreset::Wqhd.dimensions(), (2560, 1440));
        assert_eq!(ResolutionPreset::Uhd4k.dimensions(), (3840, 2160));
    }

    #[test]
    fn synthetic_payloads_normalize_in_every_advertised_format() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Nv21,
        ] {
            let data = synthetic_pixels(format, 8, 4, 7);
            let image = normalize(&RawFrame::new(8, 4, format, data)).unwrap();
            assert_eq!(image.len(), 8 * 4 * 3, "{format}");
        }
    }

    #[test]
    fn stub_selector_opens_without_hardware() {
        let profile = CaptureProfile {
            width: 1280,
            height: 720,
            format: PixelFormat::Rgb24,
            fps: 30,
        };
        let selector: CameraSelector = "stub://test".parse().unwrap();
        let mut source = FrameSource::open(&selector, profile).unwrap();
        let frame = source
            .next_frame(Duration::from_millis(100))
            .unwrap()
            .expect("synthetic source always has a frame");
        assert_eq!(frame.width, 1280);
        assert_eq!(frame.height, 720);
        source.close();
    }
}
