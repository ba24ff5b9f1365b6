//! framecast - live camera frame broadcaster.
//!
//! Captures frames from a camera, normalizes them to one canonical RGB
//! layout, JPEG-compresses them, and broadcasts the payloads over a ZeroMQ
//! PUB socket. Any number of subscribers connect independently; slow or
//! absent subscribers simply miss frames. A companion viewer decodes and
//! displays the stream.
//!
//! # Architecture
//!
//! One single-threaded loop owns the camera handle, the encoder, and the
//! publish socket:
//!
//! acquire -> normalize -> encode -> publish, paced to a target frame rate,
//! until an operator interrupt walks the pipeline through its ordered
//! shutdown. Bad frames skip one iteration and nothing else.
//!
//! # Module Structure
//!
//! - `frame`: pixel formats, raw frames, the canonical image
//! - `normalize`: per-format conversion to canonical RGB
//! - `source`: camera variants (USB, local depth pipeline, network pipeline)
//! - `encode`: JPEG compression at fixed quality
//! - `publish`: ZeroMQ PUB socket and messaging context lifecycle
//! - `pace`: frame-rate throttling and rate diagnostics
//! - `pipeline`: the lifecycle state machine tying it all together
//! - `view`: subscriber-side decode, rolling history, rate metering

pub mod encode;
pub mod frame;
pub mod normalize;
pub mod pace;
pub mod pipeline;
pub mod publish;
pub mod source;
pub mod view;

pub use encode::{FrameEncoder, JPEG_QUALITY};
pub use frame::{CanonicalImage, PixelFormat, RawFrame};
pub use normalize::{normalize, NormalizeError};
pub use pace::Pacer;
pub use pipeline::{
    PipelineConfig, PipelineState, StreamPipeline, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_PORT,
};
pub use publish::Publisher;
pub use source::{
    negotiate_profile, CameraSelector, CaptureProfile, DepthConfig, DepthSource, FrameSource,
    Negotiated, NetConfig, NetSource, ResolutionPreset, UsbConfig, UsbSource, CONTROL_PORT,
};
pub use view::{decode_payload, FrameHistory, RateMeter, HISTORY_CAPACITY};
