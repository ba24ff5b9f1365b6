//! Network-attached depth-camera pipeline source.
//!
//! The device is reached over the network on a fixed control port. There is
//! no meaningful recovery before the first frame, so failure to establish the
//! device handle at open time is fatal and propagates to process exit.
//!
//! Frames arrive JPEG-compressed; the normalizer performs the full decode.
//! A read that exceeds the socket bound surfaces as `Ok(None)` so the caller
//! retries instead of tearing the pipeline down.
//!
//! Backends: a synthetic device for `stub://` hosts (with
//! `stub://unreachable` refusing to open, mirroring a dead device) and an
//! HTTP MJPEG client behind the `camera-net` feature.

use std::time::Duration;

use anyhow::Result;

use super::{synthetic_pixels, CaptureProfile};
use crate::frame::{PixelFormat, RawFrame};

/// Fixed control port the camera listens on.
pub const CONTROL_PORT: u16 = 8090;

/// Configuration for a network-attached pipeline.
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// Camera address, without port. "stub://name" opens a synthetic device.
    pub host: String,
    /// Requested capture profile. The remote pipeline streams what it
    /// streams; the profile sizes the synthetic backend.
    pub profile: CaptureProfile,
}

/// Network-attached camera pipeline.
pub struct NetSource {
    backend: NetBackend,
}

enum NetBackend {
    Synthetic(SyntheticNetSource),
    #[cfg(feature = "camera-net")]
    Http(HttpNetSource),
    Closed(String),
}

impl NetSource {
    pub fn open(config: NetConfig) -> Result<Self> {
        if let Some(name) = config.host.strip_prefix("stub://") {
            if name == "unreachable" {
                anyhow::bail!("failed to reach camera at {}:{}", config.host, CONTROL_PORT);
            }
            log::info!("network camera {} connected (synthetic)", config.host);
            return Ok(Self {
                backend: NetBackend::Synthetic(SyntheticNetSource::new(config)),
            });
        }
        #[cfg(feature = "camera-net")]
        {
            Ok(Self {
                backend: NetBackend::Http(HttpNetSource::open(config)?),
            })
        }
        #[cfg(not(feature = "camera-net"))]
        {
            anyhow::bail!(
                "network camera {} requires the camera-net feature",
                config.host
            )
        }
    }

    pub fn next_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        match &mut self.backend {
            NetBackend::Synthetic(source) => source.next_frame(timeout),
            #[cfg(feature = "camera-net")]
            NetBackend::Http(source) => source.next_frame(),
            NetBackend::Closed(host) => anyhow::bail!("network camera {} is closed", host),
        }
    }

    pub fn close(&mut self) {
        let host = self.describe();
        if !matches!(self.backend, NetBackend::Closed(_)) {
            self.backend = NetBackend::Closed(host.clone());
            log::info!("network camera {} released", host);
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            NetBackend::Synthetic(source) => source.config.host.clone(),
            #[cfg(feature = "camera-net")]
            NetBackend::Http(source) => source.url.clone(),
            NetBackend::Closed(host) => host.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic network camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticNetSource {
    config: NetConfig,
    frame_count: u64,
}

impl SyntheticNetSource {
    fn new(config: NetConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Delivers frames the way the real device does: JPEG-compressed, so the
    /// normalizer's decode path is exercised end to end.
    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
        self.frame_count += 1;
        let width = self.config.profile.width;
        let height = self.config.profile.height;
        let rgb = synthetic_pixels(PixelFormat::Rgb24, width, height, self.frame_count);

        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95);
        encoder.encode(&rgb, width, height, image::ExtendedColorType::Rgb8)?;

        Ok(Some(RawFrame::new(width, height, PixelFormat::Mjpeg, jpeg)))
    }
}

// ----------------------------------------------------------------------------
// HTTP MJPEG client
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-net")]
use http::HttpNetSource;

#[cfg(feature = "camera-net")]
mod http {
    use std::io::{Cursor, ErrorKind, Read};
    use std::time::Duration;

    use anyhow::{Context, Result};

    use super::{NetConfig, CONTROL_PORT};
    use crate::frame::{PixelFormat, RawFrame};

    /// Bound on a single socket read; a stall longer than this surfaces as a
    /// missed frame, not an error.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    const MAX_JPEG_BYTES: usize = 8 * 1024 * 1024;

    pub(super) struct HttpNetSource {
        pub(super) url: String,
        agent: ureq::Agent,
        mode: DeliveryMode,
    }

    enum DeliveryMode {
        /// One multipart stream, frames scanned out of the byte stream.
        Mjpeg(JpegScanner),
        /// The endpoint serves one JPEG per request.
        SingleShot,
    }

    impl HttpNetSource {
        pub(super) fn open(config: NetConfig) -> Result<Self> {
            let url = format!("http://{}:{}/stream", config.host, CONTROL_PORT);
            url::Url::parse(&url).with_context(|| format!("camera address {}", config.host))?;

            let agent = ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .timeout_read(READ_TIMEOUT)
                .build();
            let response = agent
                .get(&url)
                .call()
                .with_context(|| format!("failed to reach camera at {}", url))?;

            let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
            let mode = if content_type.contains("multipart") {
                DeliveryMode::Mjpeg(JpegScanner::new(Box::new(response.into_reader())))
            } else {
                DeliveryMode::SingleShot
            };
            log::info!("network camera connected: {}", url);

            Ok(Self {
                url,
                agent,
                mode,
            })
        }

        pub(super) fn next_frame(&mut self) -> Result<Option<RawFrame>> {
            let jpeg = match &mut self.mode {
                DeliveryMode::Mjpeg(scanner) => match scanner.next_jpeg() {
                    Ok(bytes) => bytes,
                    Err(err)
                        if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
                    {
                        return Ok(None);
                    }
                    Err(err) => return Err(err).context("read mjpeg stream"),
                },
                DeliveryMode::SingleShot => {
                    let response = self
                        .agent
                        .get(&self.url)
                        .call()
                        .context("fetch camera frame")?;
                    let mut bytes = Vec::new();
                    response
                        .into_reader()
                        .take(MAX_JPEG_BYTES as u64)
                        .read_to_end(&mut bytes)
                        .context("read camera frame")?;
                    bytes
                }
            };

            // The payload is self-describing; stamp the frame with the real
            // dimensions from the JPEG header.
            let (width, height) = image::ImageReader::new(Cursor::new(&jpeg))
                .with_guessed_format()
                .context("inspect camera frame")?
                .into_dimensions()
                .context("camera frame has no decodable header")?;

            Ok(Some(RawFrame::new(width, height, PixelFormat::Mjpeg, jpeg)))
        }
    }

    /// Scans JPEG frames (SOI..EOI) out of a multipart byte stream without
    /// parsing the part headers.
    struct JpegScanner {
        reader: Box<dyn Read + Send>,
        pending: Vec<u8>,
    }

    impl JpegScanner {
        fn new(reader: Box<dyn Read + Send>) -> Self {
            Self {
                reader,
                pending: Vec::with_capacity(64 * 1024),
            }
        }

        fn next_jpeg(&mut self) -> std::io::Result<Vec<u8>> {
            let mut chunk = [0u8; 8192];
            loop {
                if let Some((start, end)) = frame_bounds(&self.pending) {
                    let frame = self.pending[start..end].to_vec();
                    self.pending.drain(..end);
                    return Ok(frame);
                }
                if self.pending.len() > MAX_JPEG_BYTES {
                    // Desynchronized stream; drop the garbage and resync.
                    self.pending.clear();
                }

                let read = self.reader.read(&mut chunk)?;
                if read == 0 {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "camera stream ended",
                    ));
                }
                self.pending.extend_from_slice(&chunk[..read]);
            }
        }
    }

    fn frame_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
        let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
        let end = buffer[start..]
            .windows(2)
            .position(|w| w == [0xFF, 0xD9])
            .map(|offset| start + offset + 2)?;
        Some((start, end))
    }

    #[cfg(test)]
    mod tests {
        use super::frame_bounds;

        #[test]
        fn frame_bounds_finds_a_complete_jpeg() {
            let data = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x00];
            assert_eq!(frame_bounds(&data), Some((1, 7)));
        }

        #[test]
        fn frame_bounds_waits_for_the_end_marker() {
            let data = [0xFF, 0xD8, 0x01, 0x02];
            assert_eq!(frame_bounds(&data), None);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn stub_config(host: &str) -> NetConfig {
        NetConfig {
            host: host.to_string(),
            profile: CaptureProfile {
                width: 320,
                height: 240,
                format: PixelFormat::Rgb24,
                fps: 30,
            },
        }
    }

    #[test]
    fn unreachable_camera_fails_at_open() {
        assert!(NetSource::open(stub_config("stub://unreachable")).is_err());
    }

    #[test]
    fn synthetic_camera_delivers_decodable_jpeg_frames() {
        let mut source = NetSource::open(stub_config("stub://lab")).unwrap();
        let frame = source
            .next_frame(Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(frame.format, PixelFormat::Mjpeg);

        let image = normalize(&frame).unwrap();
        assert_eq!(image.len(), 320 * 240 * 3);
    }

    #[test]
    fn closed_camera_refuses_capture() {
        let mut source = NetSource::open(stub_config("stub://lab")).unwrap();
        source.close();
        assert!(source.next_frame(Duration::from_millis(1)).is_err());
    }
}
