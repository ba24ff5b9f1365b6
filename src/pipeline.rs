//! The streaming pipeline: acquire, normalize, encode, publish, pace.
//!
//! Lifecycle is strictly linear: Uninitialized -> Acquiring -> ShuttingDown
//! -> Stopped. Opening binds the publish endpoint and the camera; any failure
//! there is fatal and nothing half-initialized is left running. Once
//! acquiring, only an operator interrupt ends the loop; a bad frame, a failed
//! conversion or a failed encode just skips that iteration.
//!
//! Teardown releases the camera handle, the publish socket, and the messaging
//! context, in that order, attempting every step regardless of earlier
//! failures. `Stopped` is the only state from which the process exits 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::encode::FrameEncoder;
use crate::frame::PixelFormat;
use crate::normalize::{normalize, NormalizeError};
use crate::pace::Pacer;
use crate::publish::Publisher;
use crate::source::{CameraSelector, CaptureProfile, FrameSource, ResolutionPreset};

/// Default publish port.
pub const DEFAULT_PORT: u16 = 5555;

/// Default bound on a single frame wait; a miss skips the iteration.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Where the pipeline is in its life. Transitions are linear; there is no way
/// back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Acquiring,
    ShuttingDown,
    Stopped,
}

/// Everything needed to open a pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Publish endpoint, e.g. `tcp://*:5555`.
    pub endpoint: String,
    pub camera: CameraSelector,
    pub resolution: ResolutionPreset,
    pub target_fps: u32,
    pub acquire_timeout: Duration,
}

impl PipelineConfig {
    /// Conventional endpoint for binding all interfaces on `port`.
    pub fn endpoint_for_port(port: u16) -> String {
        format!("tcp://*:{port}")
    }
}

/// The single owner of the camera handle, the encoder, and the publish
/// socket. One sequential loop; nothing here is shared or concurrent.
pub struct StreamPipeline {
    source: FrameSource,
    encoder: FrameEncoder,
    publisher: Publisher,
    pacer: Pacer,
    acquire_timeout: Duration,
    state: PipelineState,
    frames_published: u64,
    frames_skipped: u64,
    last_health_log: Instant,
}

impl StreamPipeline {
    /// Bind the publish endpoint and open the camera.
    ///
    /// Succeeding here is the only way into `Acquiring`; any error returns
    /// before a loop ever runs and the caller exits non-zero.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        let publisher = Publisher::bind(&config.endpoint)?;

        let (width, height) = config.resolution.dimensions();
        let requested = CaptureProfile {
            width,
            height,
            format: PixelFormat::Rgb24,
            fps: config.target_fps,
        };
        let source = FrameSource::open(&config.camera, requested)?;

        log::info!(
            "pipeline ready: camera {} -> {}",
            source.describe(),
            publisher.endpoint()
        );

        Ok(Self {
            source,
            encoder: FrameEncoder::new(),
            publisher,
            pacer: Pacer::new(config.target_fps),
            acquire_timeout: config.acquire_timeout,
            state: PipelineState::Acquiring,
            frames_published: 0,
            frames_skipped: 0,
            last_health_log: Instant::now(),
        })
    }

    /// The steady-state loop. Runs until `stop` is raised, then walks the
    /// shutdown sequence. The flag is only observed between iterations, never
    /// mid-frame.
    pub fn run(&mut self, stop: &AtomicBool) {
        log::info!("broadcasting frames (interrupt to stop)");
        while !stop.load(Ordering::SeqCst) {
            let iteration_started = Instant::now();
            self.iterate();
            // Skipped iterations consume pacing budget like published ones;
            // a burst of bad frames paces instead of spinning.
            self.pacer.throttle(iteration_started, stop);
            self.log_health();
        }
        self.shutdown();
    }

    /// One acquire-normalize-encode-publish cycle. Every failure mode in here
    /// is a per-iteration skip.
    fn iterate(&mut self) {
        let frame = match self.source.next_frame(self.acquire_timeout) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("no frame within {:?}", self.acquire_timeout);
                self.frames_skipped += 1;
                return;
            }
            Err(err) => {
                log::warn!("frame acquisition failed: {err:#}");
                self.frames_skipped += 1;
                return;
            }
        };

        let image = match normalize(&frame) {
            Ok(image) => image,
            Err(NormalizeError::Unsupported(format)) => {
                log::debug!("skipping frame in unsupported format {format}");
                self.frames_skipped += 1;
                return;
            }
            Err(err) => {
                log::warn!("dropping frame: {err}");
                self.frames_skipped += 1;
                return;
            }
        };

        let payload = match self.encoder.encode(&image) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("encode failed: {err:#}");
                self.frames_skipped += 1;
                return;
            }
        };

        if let Err(err) = self.publisher.send(&payload) {
            log::warn!("publish failed: {err:#}");
            self.frames_skipped += 1;
            return;
        }
        self.frames_published += 1;
    }

    /// Ordered teardown: camera handle, publish socket, messaging context.
    /// Every step is attempted; none of the close calls can abort the
    /// sequence.
    fn shutdown(&mut self) {
        if self.state != PipelineState::Acquiring {
            return;
        }
        self.state = PipelineState::ShuttingDown;
        log::info!("interrupt observed, shutting down");

        self.source.close();
        self.publisher.close_socket();
        self.publisher.close_context();

        self.state = PipelineState::Stopped;
        log::info!(
            "shutdown complete: {} frames published, {} skipped",
            self.frames_published,
            self.frames_skipped
        );
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        if let Some(fps) = self.pacer.achieved_fps() {
            log::info!(
                "streaming at {:.1} fps ({} published, {} skipped)",
                fps,
                self.frames_published,
                self.frames_skipped
            );
        }
        self.last_health_log = Instant::now();
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Resolved publish endpoint, for logs and for subscribers in tests.
    pub fn endpoint(&self) -> &str {
        self.publisher.endpoint()
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Whether every held resource has been released.
    pub fn resources_released(&self) -> bool {
        self.state == PipelineState::Stopped && self.publisher.is_released()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> PipelineConfig {
        PipelineConfig {
            endpoint: "tcp://127.0.0.1:*".to_string(),
            camera: CameraSelector::Stub("test".to_string()),
            resolution: ResolutionPreset::Hd720,
            target_fps: 0,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    #[test]
    fn open_enters_acquiring() {
        let pipeline = StreamPipeline::open(&stub_config()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Acquiring);
    }

    #[test]
    fn endpoint_bind_failure_is_fatal() {
        let holder = StreamPipeline::open(&stub_config()).unwrap();
        let mut config = stub_config();
        config.endpoint = holder.endpoint().to_string();
        assert!(StreamPipeline::open(&config).is_err());
    }

    #[test]
    fn unreachable_network_camera_is_fatal() {
        let mut config = stub_config();
        config.camera = CameraSelector::Net("stub://unreachable".to_string());
        assert!(StreamPipeline::open(&config).is_err());
    }

    #[test]
    fn raised_stop_flag_walks_the_full_shutdown_sequence() {
        let mut pipeline = StreamPipeline::open(&stub_config()).unwrap();
        let stop = AtomicBool::new(true);
        pipeline.run(&stop);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.resources_released());
    }
}
