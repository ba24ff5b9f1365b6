//! framecast_view - stream viewer.
//!
//! Connects to a framecastd endpoint, subscribes to everything, and loops:
//! receive one payload, decode it, keep a short rolling history, show the
//! newest frame, and report the observed rate. The stream has no end marker,
//! so only an operator quit (window close, `q`, or Ctrl-C) terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use framecast::{decode_payload, FrameHistory, RateMeter};

/// Receive poll interval; short enough that quit stays responsive while the
/// socket is idle.
const RECV_POLL_MS: i32 = 100;

const RATE_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "View a framecast stream")]
struct Args {
    /// Host the publisher runs on.
    #[arg(long, env = "FRAMECAST_HOST", default_value = "localhost")]
    host: String,

    /// Publisher port.
    #[arg(long, env = "FRAMECAST_PORT", default_value_t = framecast::DEFAULT_PORT)]
    port: u16,
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

    let context = zmq::Context::new();
    let socket = context
        .socket(zmq::SUB)
        .context("create subscribe socket")?;
    let endpoint = format!("tcp://{}:{}", args.host, args.port);
    socket
        .connect(&endpoint)
        .with_context(|| format!("connect to {endpoint}"))?;
    socket.set_subscribe(b"").context("subscribe to stream")?;
    socket
        .set_rcvtimeo(RECV_POLL_MS)
        .context("set receive timeout")?;
    log::info!("connected to stream at {}", endpoint);

    let mut history = FrameHistory::new();
    let mut meter = RateMeter::new();
    let mut observed_fps = None;
    let mut last_report = Instant::now();
    #[cfg(feature = "display")]
    let mut renderer = framecast::view::Renderer::new(&format!("framecast - {endpoint}"));

    while !stop.load(Ordering::SeqCst) {
        #[cfg(feature = "display")]
        if renderer.quit_requested() {
            log::info!("viewer window closed");
            break;
        }

        let payload = match socket.recv_bytes(0) {
            Ok(payload) => payload,
            Err(zmq::Error::EAGAIN) => {
                // Idle tick; keep the window responsive.
                #[cfg(feature = "display")]
                renderer.pump();
                continue;
            }
            Err(err) => return Err(err).context("receive frame"),
        };

        let image = match decode_payload(&payload) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("dropping undecodable payload ({} bytes): {err:#}", payload.len());
                continue;
            }
        };

        if let Some(fps) = meter.record() {
            log::debug!("receiving at {:.2} fps", fps);
            observed_fps = Some(fps);
        }
        if last_report.elapsed() >= RATE_REPORT_INTERVAL {
            if let Some(fps) = observed_fps {
                log::info!("stream rate {:.1} fps, {} frames buffered", fps, history.len());
            }
            last_report = Instant::now();
        }

        history.push(image);
        #[cfg(feature = "display")]
        if let Some(latest) = history.latest() {
            renderer.present(latest)?;
        }
    }

    log::info!("viewer stopped");
    Ok(())
}
