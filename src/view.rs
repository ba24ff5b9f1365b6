//! Subscriber-side pieces: payload decoding, the rolling frame history, and
//! the observed-rate meter. The viewer binary wires these into its
//! receive-decode-render loop.
//!
//! The history is a short bounded ring: it absorbs decode jitter for display
//! purposes and nothing more. There is no coordination channel back to the
//! publisher, so the viewer only ever terminates on an operator quit.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::{Context, Result};
use image::GenericImageView;

use crate::frame::CanonicalImage;

/// How many decoded frames the viewer keeps.
pub const HISTORY_CAPACITY: usize = 10;

/// Decode one wire payload into a displayable image.
///
/// The payload is self-describing; dimensions come from its own header.
pub fn decode_payload(payload: &[u8]) -> Result<CanonicalImage> {
    let image = image::load_from_memory(payload).context("decode received frame")?;
    let (width, height) = image.dimensions();
    Ok(CanonicalImage::from_rgb(
        width,
        height,
        image.into_rgb8().into_raw(),
    ))
}

// ----------------------------------------------------------------------------
// FrameHistory
// ----------------------------------------------------------------------------

/// Bounded rolling buffer of decoded frames, oldest evicted first.
pub struct FrameHistory {
    frames: VecDeque<CanonicalImage>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: CanonicalImage) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Most recently received frame; what gets rendered.
    pub fn latest(&self) -> Option<&CanonicalImage> {
        self.frames.back()
    }

    /// Frames in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalImage> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// RateMeter
// ----------------------------------------------------------------------------

/// Observed stream rate from message inter-arrival times.
pub struct RateMeter {
    last_arrival: Option<Instant>,
}

impl RateMeter {
    pub fn new() -> Self {
        Self { last_arrival: None }
    }

    /// Record an arrival; returns the instantaneous rate once two arrivals
    /// have been seen.
    pub fn record(&mut self) -> Option<f64> {
        let now = Instant::now();
        let fps = self.last_arrival.and_then(|last| {
            let gap = now.duration_since(last).as_secs_f64();
            (gap > 0.0).then(|| 1.0 / gap)
        });
        self.last_arrival = Some(now);
        fps
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Window rendering (display feature)
// ----------------------------------------------------------------------------

#[cfg(feature = "display")]
pub use render::Renderer;

#[cfg(feature = "display")]
mod render {
    use anyhow::{anyhow, Result};
    use minifb::{Key, Window, WindowOptions};

    use crate::frame::CanonicalImage;

    /// Framebuffer window showing the newest frame.
    ///
    /// The window is created lazily from the first frame's dimensions and
    /// recreated if the stream changes size.
    pub struct Renderer {
        title: String,
        window: Option<Window>,
        buffer: Vec<u32>,
        width: usize,
        height: usize,
    }

    impl Renderer {
        pub fn new(title: &str) -> Self {
            Self {
                title: title.to_string(),
                window: None,
                buffer: Vec::new(),
                width: 0,
                height: 0,
            }
        }

        pub fn present(&mut self, image: &CanonicalImage) -> Result<()> {
            let width = image.width as usize;
            let height = image.height as usize;
            if self.window.is_none() || self.width != width || self.height != height {
                let window = Window::new(&self.title, width, height, WindowOptions::default())
                    .map_err(|err| anyhow!("open viewer window: {err}"))?;
                self.window = Some(window);
                self.width = width;
                self.height = height;
                self.buffer = vec![0u32; width * height];
            }

            for (slot, px) in self.buffer.iter_mut().zip(image.pixels().chunks_exact(3)) {
                *slot = (u32::from(px[0]) << 16) | (u32::from(px[1]) << 8) | u32::from(px[2]);
            }
            self.window
                .as_mut()
                .expect("window created above")
                .update_with_buffer(&self.buffer, width, height)
                .map_err(|err| anyhow!("present frame: {err}"))
        }

        /// Keep the window responsive while no frame has arrived.
        pub fn pump(&mut self) {
            if let Some(window) = self.window.as_mut() {
                window.update();
            }
        }

        /// Operator quit: window closed, `q`, or Escape.
        pub fn quit_requested(&self) -> bool {
            match &self.window {
                Some(window) => {
                    !window.is_open()
                        || window.is_key_down(Key::Q)
                        || window.is_key_down(Key::Escape)
                }
                None => false,
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::FrameEncoder;
    use crate::frame::{PixelFormat, RawFrame};
    use crate::normalize::normalize;

    fn tagged_image(tag: u8) -> CanonicalImage {
        CanonicalImage::from_rgb(1, 1, vec![tag, tag, tag])
    }

    #[test]
    fn history_keeps_the_ten_most_recent_frames_in_order() {
        let mut history = FrameHistory::new();
        for tag in 0..25u8 {
            history.push(tagged_image(tag));
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        let tags: Vec<u8> = history.iter().map(|image| image.pixels()[0]).collect();
        assert_eq!(tags, (15..25).collect::<Vec<u8>>());
        assert_eq!(history.latest().unwrap().pixels()[0], 24);
    }

    #[test]
    fn history_below_capacity_holds_everything() {
        let mut history = FrameHistory::new();
        for tag in 0..3u8 {
            history.push(tagged_image(tag));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn rate_meter_needs_two_arrivals() {
        let mut meter = RateMeter::new();
        assert!(meter.record().is_none());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let fps = meter.record().expect("second arrival yields a rate");
        assert!(fps > 0.0);
    }

    #[test]
    fn published_payloads_decode_back_to_the_same_dimensions() {
        let frame = RawFrame::new(32, 16, PixelFormat::Rgb24, vec![128u8; 32 * 16 * 3]);
        let image = normalize(&frame).unwrap();
        let payload = FrameEncoder::new().encode(&image).unwrap();

        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.width, 32);
        assert_eq!(decoded.height, 16);
        assert_eq!(decoded.len(), 32 * 16 * 3);
    }

    #[test]
    fn garbage_payloads_fail_cleanly() {
        assert!(decode_payload(&[0x00, 0x01, 0x02]).is_err());
    }
}
