//! Pull pacing for the camera stream.
//!
//! The viewer asks for one frame at a time. After each frame it waits just
//! long enough that the *next* pull goes out one target frame interval after
//! this one, minus the smoothed round-trip latency:
//!
//! ```text
//! latency_ema  = latency_ema * 0.2 + latency * 0.8
//! interval_ema = interval_ema * 0.9 + interval * 0.1
//! delay        = max(0, target_interval - latency_ema)
//! ```
//!
//! A slow link shortens the wait instead of lowering the frame rate, the wait
//! is floored at zero so pulls never go out faster than "immediately", and
//! every measurement re-anchors the next delay so drift cannot accumulate.

use std::time::{Duration, Instant};

/// Default viewer frame rate.
pub const DEFAULT_TARGET_FPS: f64 = 24.0;

/// Slowest accepted frame rate; lower requests are raised to it.
pub const MIN_TARGET_FPS: f64 = 0.001;

/// Weight of the previous frame-interval average (larger = more smoothing).
pub const FRAME_INTERVAL_SMOOTHING: f64 = 0.9;

/// Weight of the previous request-latency average (larger = more smoothing).
pub const REQUEST_LATENCY_SMOOTHING: f64 = 0.2;

/// Smoothed timing for one connection.
///
/// Pristine (all zero, no markers) whenever a new connection handle is
/// created; nothing carries over between connections.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacingState {
    /// EMA of the time between rendered frames, in milliseconds.
    pub smoothed_frame_interval_ms: f64,
    /// EMA of the pull-to-frame round trip, in milliseconds.
    pub smoothed_request_latency_ms: f64,
    /// When the last frame arrived (seeded with the open time).
    pub last_frame_at: Option<Instant>,
    /// When the outstanding pull was sent.
    pub last_request_at: Option<Instant>,
}

/// Decides when the next pull should be issued.
#[derive(Debug, Clone)]
pub struct PacingController {
    target_fps: f64,
    target_interval_ms: f64,
    state: PacingState,
}

impl PacingController {
    /// Create a controller for the given frame rate.
    ///
    /// Non-finite or non-positive rates fall back to [`DEFAULT_TARGET_FPS`];
    /// positive rates below [`MIN_TARGET_FPS`] are raised to it.
    #[must_use]
    pub fn new(target_fps: f64) -> Self {
        let target_fps = if target_fps.is_finite() && target_fps >= MIN_TARGET_FPS {
            target_fps
        } else if target_fps.is_finite() && target_fps > 0.0 {
            tracing::warn!(
                requested = target_fps,
                minimum = MIN_TARGET_FPS,
                "Target frame rate too low, using minimum"
            );
            MIN_TARGET_FPS
        } else {
            tracing::warn!(
                requested = target_fps,
                fallback = DEFAULT_TARGET_FPS,
                "Invalid target frame rate, using default"
            );
            DEFAULT_TARGET_FPS
        };
        Self {
            target_fps,
            target_interval_ms: 1000.0 / target_fps,
            state: PacingState::default(),
        }
    }

    /// Target frame rate in frames per second.
    #[must_use]
    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Target time between frames in milliseconds (1000 / fps).
    #[must_use]
    pub fn target_interval_ms(&self) -> f64 {
        self.target_interval_ms
    }

    /// Current timing state.
    #[must_use]
    pub fn state(&self) -> &PacingState {
        &self.state
    }

    /// Drop all timing history.
    pub fn reset(&mut self) {
        self.state = PacingState::default();
    }

    /// Seed the frame baseline when the transport opens, so the first
    /// interval measured is open-to-first-frame.
    pub fn on_open(&mut self, now: Instant) {
        self.state.last_frame_at = Some(now);
    }

    /// Record that a pull was sent.
    pub fn on_request_sent(&mut self, now: Instant) {
        self.state.last_request_at = Some(now);
    }

    /// Record a frame arrival and return how long to wait before the next pull.
    pub fn on_frame_received(&mut self, now: Instant) -> Duration {
        let request_start = self.state.last_request_at.unwrap_or(now);
        let frame_time = self.state.last_frame_at.unwrap_or(now);
        self.compute_next_delay(now, request_start, frame_time)
    }

    /// Fold one measurement into the averages and return the next delay.
    ///
    /// `prior_request_start` is when the pull answered by this frame was sent,
    /// `prior_frame_time` is when the previous frame (or the open) happened.
    /// Timestamps later than `now` count as zero elapsed time.
    pub fn compute_next_delay(
        &mut self,
        now: Instant,
        prior_request_start: Instant,
        prior_frame_time: Instant,
    ) -> Duration {
        let frame_interval_ms = millis(now.saturating_duration_since(prior_frame_time));
        self.state.smoothed_frame_interval_ms = self.state.smoothed_frame_interval_ms
            * FRAME_INTERVAL_SMOOTHING
            + frame_interval_ms * (1.0 - FRAME_INTERVAL_SMOOTHING);
        self.state.last_frame_at = Some(now);

        let request_latency_ms = millis(now.saturating_duration_since(prior_request_start));
        self.state.smoothed_request_latency_ms = self.state.smoothed_request_latency_ms
            * REQUEST_LATENCY_SMOOTHING
            + request_latency_ms * (1.0 - REQUEST_LATENCY_SMOOTHING);

        self.next_delay()
    }

    /// `max(0, target_interval - smoothed_latency)` for the current state.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let delay_ms = (self.target_interval_ms - self.state.smoothed_request_latency_ms).max(0.0);
        Duration::try_from_secs_f64(delay_ms / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Frame rate implied by the smoothed frame interval (0 before any frame).
    #[must_use]
    pub fn effective_fps(&self) -> f64 {
        if self.state.smoothed_frame_interval_ms > 0.0 {
            1000.0 / self.state.smoothed_frame_interval_ms
        } else {
            0.0
        }
    }
}

impl Default for PacingController {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_FPS)
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
