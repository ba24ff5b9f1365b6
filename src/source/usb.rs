//! USB camera source.
//!
//! The plainest variant: addressed by device index, each capture is a
//! blocking synchronous read with no explicit timeout (the driver paces
//! delivery). Format is whatever the driver grants; the normalizer sorts the
//! rest out downstream.
//!
//! Backends: a synthetic device for `stub://` selectors and a V4L2 mmap
//! stream behind the `camera-v4l2` feature.

use anyhow::Result;

use super::synthetic_pixels;
use crate::frame::{PixelFormat, RawFrame};

/// Configuration for a USB camera.
#[derive(Clone, Debug)]
pub struct UsbConfig {
    /// Device selector: a numeric index ("0"), an explicit node path
    /// ("/dev/video2"), or "stub://name" for a synthetic camera.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

/// USB camera source.
pub struct UsbSource {
    backend: UsbBackend,
}

enum UsbBackend {
    Synthetic(SyntheticUsbSource),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceUsbSource),
    Closed(String),
}

impl UsbSource {
    pub fn open(config: UsbConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            log::info!("usb camera {} opened (synthetic)", config.device);
            return Ok(Self {
                backend: UsbBackend::Synthetic(SyntheticUsbSource::new(config)),
            });
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: UsbBackend::Device(DeviceUsbSource::open(config)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            anyhow::bail!(
                "usb camera {} requires the camera-v4l2 feature",
                config.device
            )
        }
    }

    /// Capture the next frame. Blocks until the driver hands one over.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            UsbBackend::Synthetic(source) => Ok(Some(source.next_frame())),
            #[cfg(feature = "camera-v4l2")]
            UsbBackend::Device(source) => source.next_frame().map(Some),
            UsbBackend::Closed(device) => anyhow::bail!("usb camera {} is closed", device),
        }
    }

    pub fn close(&mut self) {
        let device = self.describe();
        if !matches!(self.backend, UsbBackend::Closed(_)) {
            self.backend = UsbBackend::Closed(device.clone());
            log::info!("usb camera {} released", device);
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            UsbBackend::Synthetic(source) => source.config.device.clone(),
            #[cfg(feature = "camera-v4l2")]
            UsbBackend::Device(source) => source.device_path.clone(),
            UsbBackend::Closed(device) => device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticUsbSource {
    config: UsbConfig,
    frame_count: u64,
}

impl SyntheticUsbSource {
    fn new(config: UsbConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> RawFrame {
        self.frame_count += 1;
        let data = synthetic_pixels(
            PixelFormat::Rgb24,
            self.config.width,
            self.config.height,
            self.frame_count,
        );
        RawFrame::new(
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
            data,
        )
    }
}

// ----------------------------------------------------------------------------
// V4L2 camera
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
use device::DeviceUsbSource;

#[cfg(feature = "camera-v4l2")]
mod device {
    use anyhow::{anyhow, Context, Result};
    use ouroboros::self_referencing;
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;

    use super::UsbConfig;
    use crate::frame::{PixelFormat, RawFrame};

    pub(super) struct DeviceUsbSource {
        pub(super) device_path: String,
        width: u32,
        height: u32,
        format: PixelFormat,
        state: CaptureState,
    }

    #[self_referencing]
    struct CaptureState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceUsbSource {
        pub(super) fn open(config: UsbConfig) -> Result<Self> {
            let device_path = if config.device.starts_with("/dev/") {
                config.device.clone()
            } else {
                format!("/dev/video{}", config.device)
            };
            let mut device = v4l::Device::with_path(&device_path)
                .with_context(|| format!("open usb camera {}", device_path))?;

            let mut format = device.format().context("read camera format")?;
            format.width = config.width;
            format.height = config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");
            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("usb camera {}: failed to set format: {}", device_path, err);
                    device
                        .format()
                        .context("read camera format after set failure")?
                }
            };

            let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
                .ok_or_else(|| anyhow!("camera delivers unknown format {}", format.fourcc))?;
            log::info!(
                "usb camera {} opened: {}x{} {}",
                device_path,
                format.width,
                format.height,
                pixel_format
            );

            let state = CaptureStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create capture stream"))
                },
            }
            .try_build()?;

            Ok(Self {
                device_path,
                width: format.width,
                height: format.height,
                format: pixel_format,
                state,
            })
        }

        pub(super) fn next_frame(&mut self) -> Result<RawFrame> {
            let data = self
                .state
                .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
                .context("capture usb frame")?;
            Ok(RawFrame::new(self.width, self.height, self.format, data))
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> UsbConfig {
        UsbConfig {
            device: "stub://test".to_string(),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn synthetic_camera_produces_rgb_frames() {
        let mut source = UsbSource::open(stub_config()).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.data.len(), 640 * 480 * 3);
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = UsbSource::open(stub_config()).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn closed_camera_refuses_capture() {
        let mut source = UsbSource::open(stub_config()).unwrap();
        source.close();
        assert!(source.next_frame().is_err());
        source.close();
    }
}
