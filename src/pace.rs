//! Soft real-time pacing of the capture loop.
//!
//! After each full acquire-normalize-encode-publish cycle the pacer sleeps
//! for whatever is left of the target period: `max(0, 1/rate - elapsed)`.
//! A cycle that already overran its period gets no sleep at all, so the loop
//! degrades to the rate the pipeline can actually sustain instead of
//! blocking.
//!
//! The sleep is taken in short slices with the stop flag checked in between,
//! so an interrupt arriving mid-sleep still reaches shutdown promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Throttles loop iterations to a target frame rate.
pub struct Pacer {
    period: Duration,
    achieved_fps: Option<f64>,
}

impl Pacer {
    /// A target of 0 disables pacing; the loop runs as fast as it can.
    pub fn new(target_fps: u32) -> Self {
        let period = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(target_fps))
        };
        Self {
            period,
            achieved_fps: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Remaining sleep for one iteration: `max(0, period - elapsed)`.
    pub fn sleep_budget(period: Duration, elapsed: Duration) -> Duration {
        period.saturating_sub(elapsed)
    }

    /// Complete one iteration started at `iteration_started`: record the
    /// instantaneous rate, then sleep off the rest of the period.
    pub fn throttle(&mut self, iteration_started: Instant, stop: &AtomicBool) {
        let elapsed = iteration_started.elapsed();
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.achieved_fps = Some(1.0 / secs);
        }
        idle(Self::sleep_budget(self.period, elapsed), stop);
    }

    /// Reciprocal of the last measured cycle time. Diagnostic only; nothing
    /// feeds it back into control flow.
    pub fn achieved_fps(&self) -> Option<f64> {
        self.achieved_fps
    }
}

/// Sleep for `total`, waking early if `stop` is raised.
pub fn idle(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
