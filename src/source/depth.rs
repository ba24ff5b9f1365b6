//! Local depth-camera pipeline source.
//!
//! At open time the pipeline asks the device for its advertised capture
//! profiles and negotiates: an exact (width, height, format, rate) match is
//! used as requested, anything else falls back to the device default profile
//! with the substitution logged. Opening only fails when the device itself is
//! unreachable.
//!
//! `next_frame` takes an explicit timeout and reports a miss as `Ok(None)` so
//! the caller can retry without treating a transient gap as fatal.
//!
//! Backends: a synthetic device for `stub://` selectors (always available) and
//! a V4L2-backed pipeline behind the `camera-v4l2` feature.

use std::time::Duration;

use anyhow::Result;

use super::{synthetic_pixels, CaptureProfile};
use crate::frame::{PixelFormat, RawFrame};

/// Configuration for a local depth pipeline.
#[derive(Clone, Debug)]
pub struct DepthConfig {
    /// Device selector: "auto" for the default node, an explicit path
    /// ("/dev/video2"), or "stub://name" for a synthetic device.
    pub device: String,
    /// Requested capture profile; negotiated against the device at open.
    pub profile: CaptureProfile,
}

/// Outcome of capture-profile negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiated {
    /// The device supports the requested profile as-is.
    Exact(CaptureProfile),
    /// The requested profile is unavailable; the device default is used.
    Fallback {
        requested: CaptureProfile,
        selected: CaptureProfile,
    },
}

impl Negotiated {
    pub fn selected(&self) -> CaptureProfile {
        match *self {
            Negotiated::Exact(profile) => profile,
            Negotiated::Fallback { selected, .. } => selected,
        }
    }
}

/// Pick the profile to configure: the exact request when advertised,
/// otherwise the device default. Pure so the policy is testable without a
/// device.
pub fn negotiate_profile(
    requested: CaptureProfile,
    advertised: &[CaptureProfile],
    device_default: CaptureProfile,
) -> Negotiated {
    if advertised.contains(&requested) {
        Negotiated::Exact(requested)
    } else {
        Negotiated::Fallback {
            requested,
            selected: device_default,
        }
    }
}

/// Local depth-camera pipeline.
pub struct DepthSource {
    backend: DepthBackend,
}

enum DepthBackend {
    Synthetic(SyntheticDepthSource),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceDepthSource),
    /// Placeholder after `close`; every call reports the source as released.
    Closed(String),
}

impl DepthSource {
    pub fn open(config: DepthConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: DepthBackend::Synthetic(SyntheticDepthSource::open(config)),
            });
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: DepthBackend::Device(DeviceDepthSource::open(config)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            anyhow::bail!(
                "depth camera {} requires the camera-v4l2 feature",
                config.device
            )
        }
    }

    /// The profile actually selected at open time.
    pub fn active_profile(&self) -> Option<CaptureProfile> {
        match &self.backend {
            DepthBackend::Synthetic(source) => Some(source.negotiated.selected()),
            #[cfg(feature = "camera-v4l2")]
            DepthBackend::Device(source) => Some(source.negotiated.selected()),
            DepthBackend::Closed(_) => None,
        }
    }

    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            DepthBackend::Synthetic(source) => source.next_frame(timeout),
            #[cfg(feature = "camera-v4l2")]
            DepthBackend::Device(source) => source.next_frame(timeout),
            DepthBackend::Closed(device) => {
                anyhow::bail!("depth pipeline {} is closed", device)
            }
        }
    }

    pub fn close(&mut self) {
        let device = self.describe();
        if !matches!(self.backend, DepthBackend::Closed(_)) {
            self.backend = DepthBackend::Closed(device.clone());
            log::info!("depth pipeline {} released", device);
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            DepthBackend::Synthetic(source) => source.config.device.clone(),
            #[cfg(feature = "camera-v4l2")]
            DepthBackend::Device(source) => source.device_path.clone(),
            DepthBackend::Closed(device) => device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic pipeline (stub://)
// ----------------------------------------------------------------------------

/// Profiles the synthetic device advertises. Mirrors a real depth camera:
/// the highest resolutions only run at 15 fps, and the depth sensor stream
/// is advertised alongside color.
const SYNTHETIC_PROFILES: &[CaptureProfile] = &[
    CaptureProfile {
        width: 640,
        height: 480,
        format: PixelFormat::Yuyv,
        fps: 30,
    },
    CaptureProfile {
        width: 1280,
        height: 720,
        format: PixelFormat::Rgb24,
        fps: 30,
    },
    CaptureProfile {
        width: 1280,
        height: 720,
        format: PixelFormat::Yuyv,
        fps: 30,
    },
    CaptureProfile {
        width: 1280,
        height: 960,
        format: PixelFormat::Rgb24,
        fps: 30,
    },
    CaptureProfile {
        width: 1920,
        height: 1080,
        format: PixelFormat::Rgb24,
        fps: 30,
    },
    CaptureProfile {
        width: 1920,
        height: 1080,
        format: PixelFormat::Nv12,
        fps: 30,
    },
    CaptureProfile {
        width: 2560,
        height: 1440,
        format: PixelFormat::Rgb24,
        fps: 15,
    },
    CaptureProfile {
        width: 3840,
        height: 2160,
        format: PixelFormat::Rgb24,
        fps: 15,
    },
    CaptureProfile {
        width: 848,
        height: 480,
        format: PixelFormat::Depth16,
        fps: 30,
    },
];

const SYNTHETIC_DEFAULT: CaptureProfile = CaptureProfile {
    width: 640,
    height: 480,
    format: PixelFormat::Yuyv,
    fps: 30,
};

struct SyntheticDepthSource {
    config: DepthConfig,
    negotiated: Negotiated,
    frame_count: u64,
}

impl SyntheticDepthSource {
    fn open(config: DepthConfig) -> Self {
        let negotiated = negotiate_profile(config.profile, SYNTHETIC_PROFILES, SYNTHETIC_DEFAULT);
        match negotiated {
            Negotiated::Exact(profile) => {
                log::info!("depth pipeline {} started: {}", config.device, profile);
            }
            Negotiated::Fallback {
                requested,
                selected,
            } => {
                log::warn!(
                    "depth pipeline {}: requested profile {} unavailable, using default {}",
                    config.device,
                    requested,
                    selected
                );
            }
        }
        Self {
            config,
            negotiated,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
        let profile = self.negotiated.selected();
        self.frame_count += 1;
        let data = synthetic_pixels(
            profile.format,
            profile.width,
            profile.height,
            self.frame_count,
        );
        Ok(Some(RawFrame::new(
            profile.width,
            profile.height,
            profile.format,
            data,
        )))
    }
}

// ----------------------------------------------------------------------------
// V4L2-backed pipeline
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
use device::DeviceDepthSource;

#[cfg(feature = "camera-v4l2")]
mod device {
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::time::Duration;

    use anyhow::{anyhow, Context, Result};
    use ouroboros::self_referencing;
    use v4l::buffer::Type;
    use v4l::io::traits::{CaptureStream, Stream};
    use v4l::video::Capture;

    use super::{negotiate_profile, CaptureProfile, DepthConfig, Negotiated};
    use crate::frame::{PixelFormat, RawFrame};

    pub(super) struct DeviceDepthSource {
        pub(super) device_path: String,
        pub(super) negotiated: Negotiated,
        active: CaptureProfile,
        fd: RawFd,
        state: CaptureState,
    }

    #[self_referencing]
    struct CaptureState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceDepthSource {
        pub(super) fn open(config: DepthConfig) -> Result<Self> {
            let device_path = if config.device == "auto" {
                "/dev/video0".to_string()
            } else {
                config.device.clone()
            };
            let mut device = v4l::Device::with_path(&device_path)
                .with_context(|| format!("open depth pipeline {}", device_path))?;

            let advertised = enumerate_profiles(&device)?;
            let device_default = current_profile(&device)?;
            let negotiated = negotiate_profile(config.profile, &advertised, device_default);
            match negotiated {
                Negotiated::Exact(profile) => {
                    log::info!("depth pipeline {}: profile {}", device_path, profile);
                }
                Negotiated::Fallback {
                    requested,
                    selected,
                } => {
                    log::warn!(
                        "depth pipeline {}: requested profile {} unavailable, using default {}",
                        device_path,
                        requested,
                        selected
                    );
                }
            }
            let active = apply_profile(&mut device, negotiated.selected())?;

            let fd = device.as_raw_fd();
            let mut state = CaptureStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create capture stream"))
                },
            }
            .try_build()?;
            state
                .with_stream_mut(|stream| stream.start())
                .context("start capture stream")?;

            Ok(Self {
                device_path,
                negotiated,
                active,
                fd,
                state,
            })
        }

        pub(super) fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
            if !wait_readable(self.fd, timeout)? {
                return Ok(None);
            }
            let data = self
                .state
                .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
                .context("dequeue capture buffer")?;
            Ok(Some(RawFrame::new(
                self.active.width,
                self.active.height,
                self.active.format,
                data,
            )))
        }
    }

    fn enumerate_profiles(device: &v4l::Device) -> Result<Vec<CaptureProfile>> {
        let mut profiles = Vec::new();
        for description in device.enum_formats().context("enumerate formats")? {
            let Some(format) = PixelFormat::from_fourcc(&description.fourcc.repr) else {
                continue;
            };
            for size in device
                .enum_framesizes(description.fourcc)
                .context("enumerate frame sizes")?
            {
                let v4l::framesize::FrameSizeEnum::Discrete(discrete) = size.size else {
                    continue;
                };
                for interval in device
                    .enum_frameintervals(size.fourcc, discrete.width, discrete.height)
                    .context("enumerate frame intervals")?
                {
                    let v4l::frameinterval::FrameIntervalEnum::Discrete(fraction) =
                        interval.interval
                    else {
                        continue;
                    };
                    if fraction.numerator == 0 {
                        continue;
                    }
                    profiles.push(CaptureProfile {
                        width: discrete.width,
                        height: discrete.height,
                        format,
                        fps: fraction.denominator / fraction.numerator,
                    });
                }
            }
        }
        Ok(profiles)
    }

    fn current_profile(device: &v4l::Device) -> Result<CaptureProfile> {
        let format = device.format().context("read device format")?;
        let params = device.params().context("read device params")?;
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .ok_or_else(|| anyhow!("device default format {} is unknown", format.fourcc))?;
        let interval = params.interval;
        let fps = if interval.numerator == 0 {
            0
        } else {
            interval.denominator / interval.numerator
        };
        Ok(CaptureProfile {
            width: format.width,
            height: format.height,
            format: pixel_format,
            fps,
        })
    }

    fn apply_profile(device: &mut v4l::Device, profile: CaptureProfile) -> Result<CaptureProfile> {
        let mut format = device.format().context("read device format")?;
        format.width = profile.width;
        format.height = profile.height;
        format.fourcc = v4l::FourCC::new(&profile.format.to_fourcc());
        let applied = device.set_format(&format).context("apply capture format")?;

        if profile.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(profile.fps);
            device.set_params(&params).context("apply frame rate")?;
        }

        let active_format = PixelFormat::from_fourcc(&applied.fourcc.repr)
            .ok_or_else(|| anyhow!("device selected unknown format {}", applied.fourcc))?;
        Ok(CaptureProfile {
            width: applied.width,
            height: applied.height,
            format: active_format,
            fps: profile.fps,
        })
    }

    /// Wait for the capture fd to become readable, so the dequeue below
    /// cannot block past the caller's timeout.
    fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            return Err(anyhow!(
                "poll capture fd: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(rc > 0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(width: u32, height: u32, format: PixelFormat, fps: u32) -> CaptureProfile {
        CaptureProfile {
            width,
            height,
            format,
            fps,
        }
    }

    #[test]
    fn exact_profile_is_kept() {
        let wanted = profile(1280, 720, PixelFormat::Rgb24, 30);
        let outcome = negotiate_profile(wanted, SYNTHETIC_PROFILES, SYNTHETIC_DEFAULT);
        assert_eq!(outcome, Negotiated::Exact(wanted));
        assert_eq!(outcome.selected(), wanted);
    }

    #[test]
    fn unavailable_profile_falls_back_to_device_default() {
        // WQHD is only advertised at 15 fps; asking for 30 must not fail.
        let wanted = profile(2560, 1440, PixelFormat::Rgb24, 30);
        let outcome = negotiate_profile(wanted, SYNTHETIC_PROFILES, SYNTHETIC_DEFAULT);
        assert_eq!(
            outcome,
            Negotiated::Fallback {
                requested: wanted,
                selected: SYNTHETIC_DEFAULT,
            }
        );
        assert_eq!(outcome.selected(), SYNTHETIC_DEFAULT);
    }

    #[test]
    fn synthetic_source_delivers_the_negotiated_profile() {
        let mut source = DepthSource::open(DepthConfig {
            device: "stub://bench".to_string(),
            profile: profile(1920, 1080, PixelFormat::Nv12, 30),
        })
        .unwrap();
        assert_eq!(
            source.active_profile(),
            Some(profile(1920, 1080, PixelFormat::Nv12, 30))
        );

        let frame = source
            .next_frame(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert_eq!(frame.format, PixelFormat::Nv12);
        assert_eq!(
            frame.data.len(),
            PixelFormat::Nv12.expected_len(1920, 1080).unwrap()
        );
    }

    #[test]
    fn closed_source_reports_release_once() {
        let mut source = DepthSource::open(DepthConfig {
            device: "stub://bench".to_string(),
            profile: SYNTHETIC_DEFAULT,
        })
        .unwrap();
        source.close();
        assert_eq!(source.active_profile(), None);
        assert!(source.next_frame(Duration::from_millis(1)).is_err());
        // A second close is a no-op, not a double release.
        source.close();
    }
}
