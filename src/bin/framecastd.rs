//! framecastd - frame broadcast daemon.
//!
//! Opens the configured camera, binds the publish endpoint, and streams
//! JPEG-compressed frames until interrupted:
//! 1. Bind the ZeroMQ PUB socket and open the camera (failure exits 1)
//! 2. Loop: acquire, normalize, encode, publish, pace
//! 3. On Ctrl-C, release camera, socket, and context in order, then exit 0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;

use framecast::{
    CameraSelector, PipelineConfig, PipelineState, ResolutionPreset, StreamPipeline,
    DEFAULT_ACQUIRE_TIMEOUT,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Broadcast camera frames over a ZeroMQ publish socket")]
struct Args {
    /// TCP port the publish socket binds on all interfaces.
    #[arg(long, env = "FRAMECAST_PORT", default_value_t = framecast::DEFAULT_PORT)]
    port: u16,

    /// Target frame rate; 0 streams as fast as the camera delivers.
    #[arg(long, env = "FRAMECAST_FPS", default_value_t = 30)]
    fps: u32,

    /// Camera selector: a USB device index ("0"), "depth" for the local
    /// depth-camera pipeline, "net://HOST" for a network-attached camera,
    /// or "stub://NAME" for a synthetic source.
    #[arg(long, env = "FRAMECAST_CAMERA", default_value = "0")]
    camera: CameraSelector,

    /// Capture resolution preset.
    #[arg(long, value_enum, default_value_t = ResolutionPreset::Hd720)]
    resolution: ResolutionPreset,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install interrupt handler")?;
    }

    let config = PipelineConfig {
        endpoint: PipelineConfig::endpoint_for_port(args.port),
        camera: args.camera,
        resolution: args.resolution,
        target_fps: args.fps,
        acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
    };

    // Bind + open failures land here and exit the process with status 1.
    let mut pipeline = StreamPipeline::open(&config)?;
    pipeline.run(&stop);

    ensure!(
        pipeline.state() == PipelineState::Stopped,
        "pipeline ended in state {:?}",
        pipeline.state()
    );
    Ok(())
}
