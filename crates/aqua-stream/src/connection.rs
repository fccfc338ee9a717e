//! Stream connection state machine.
//!
//! The connection owns the socket lifecycle and the one-pull-in-flight
//! discipline. It performs no I/O: every event method takes the current time,
//! updates the state and returns the [`Effect`]s the runtime has to execute.
//!
//! # State Machine
//!
//! ```text
//! Closed ──start()──> Opening ──opened──> Streaming
//!   ▲                    │                    │
//!   │                    │ stop() / closed    │ stop() / closed
//!   └────────────────────┴────────────────────┘
//! ```
//!
//! # Pull Loop
//!
//! ```text
//! opened ──> SendPull ──> frame ──> Display + ArmTimer(delay) ──> timer ──> SendPull ...
//! ```
//!
//! Every handle carries a [`Generation`]. Events tagged with anything other
//! than the canonical generation (a socket that was stopped or superseded) are
//! discarded, so a stop followed by a start can never leak a frame or a pull
//! from the old socket into the new one.

use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

use crate::endpoint::StreamEndpoint;
use crate::pacing::PacingController;

/// Identity of one transport instance. Strictly increasing per viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub(crate) u64);

impl Generation {
    /// Raw counter value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One socket instance as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    generation: Generation,
    canonical: bool,
}

impl ConnectionHandle {
    /// Transport identity.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether this is the live handle whose events are honoured.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }
}

/// Lifecycle state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No socket.
    Closed,
    /// Socket requested, waiting for the open event.
    Opening,
    /// Socket open, pull loop running.
    Streaming,
}

impl StreamState {
    /// Returns a short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Opening => "Opening...",
            Self::Streaming => "Streaming",
        }
    }

    /// Returns true if a socket exists or is being opened.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Where the single pull of the current handle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPhase {
    /// Nothing outstanding, nothing scheduled.
    Idle,
    /// A pull was sent and its frame has not arrived.
    InFlight,
    /// A frame arrived; the next pull waits on the timer.
    Scheduled,
}

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the socket.
    Remote,
    /// Opening failed or the socket errored.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "closed by server"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin streaming from the endpoint.
    Start(StreamEndpoint),
    /// Stop streaming.
    Stop,
    /// Transport of the given generation opened.
    Opened(Generation),
    /// Transport delivered a frame payload.
    Frame(Generation, Bytes),
    /// The pull timer armed for the given generation elapsed.
    TimerFired(Generation),
    /// Transport closed or failed.
    Closed(Generation, CloseReason),
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a transport for the new handle.
    Open {
        /// Handle identity.
        generation: Generation,
        /// Where to connect.
        endpoint: StreamEndpoint,
    },
    /// Send one "more" token.
    SendPull {
        /// Handle identity.
        generation: Generation,
    },
    /// Hand the payload to the frame sink.
    Display {
        /// Handle identity.
        generation: Generation,
        /// Encoded frame.
        payload: Bytes,
    },
    /// Fire [`Event::TimerFired`] after `delay`, replacing any armed timer.
    ArmTimer {
        /// Handle identity.
        generation: Generation,
        /// Wait before the next pull.
        delay: Duration,
    },
    /// Disarm the pull timer.
    CancelTimer {
        /// Handle identity.
        generation: Generation,
    },
    /// Close and release the transport.
    Close {
        /// Handle identity.
        generation: Generation,
    },
}

/// Why an event was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Event belongs to a stopped or superseded handle.
    StaleCallback,
    /// Frame arrived with no pull outstanding.
    Unsolicited,
    /// Event does not apply in the current state.
    OutOfOrder,
}

/// Connection counters, cumulative over all handles of one viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Transports requested.
    pub connections_started: u64,
    /// Transports that failed to open or errored.
    pub connection_failures: u64,
    /// Pull tokens sent.
    pub pulls_sent: u64,
    /// Frames accepted for display.
    pub frames_received: u64,
    /// Events dropped because their handle was no longer canonical.
    pub stale_discarded: u64,
    /// Frames dropped because no pull was outstanding.
    pub unsolicited_discarded: u64,
}

/// Sans-IO stream connection.
#[derive(Debug)]
pub struct StreamConnection {
    state: StreamState,
    handle: Option<ConnectionHandle>,
    endpoint: Option<StreamEndpoint>,
    pull: PullPhase,
    pacing: PacingController,
    next_generation: u64,
    stats: StreamStats,
}

impl StreamConnection {
    /// Create a closed connection pacing at `target_fps`.
    #[must_use]
    pub fn new(target_fps: f64) -> Self {
        Self {
            state: StreamState::Closed,
            handle: None,
            endpoint: None,
            pull: PullPhase::Idle,
            pacing: PacingController::new(target_fps),
            next_generation: 0,
            stats: StreamStats::default(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Current pull phase.
    #[must_use]
    pub fn pull_phase(&self) -> PullPhase {
        self.pull
    }

    /// Most recent handle, canonical or not.
    #[must_use]
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Endpoint of the most recent start.
    #[must_use]
    pub fn endpoint(&self) -> Option<&StreamEndpoint> {
        self.endpoint.as_ref()
    }

    /// Timing state of the current handle.
    #[must_use]
    pub fn pacing(&self) -> &PacingController {
        &self.pacing
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Returns true if `generation` is the live handle.
    #[must_use]
    pub fn is_canonical(&self, generation: Generation) -> bool {
        self.handle
            .is_some_and(|h| h.canonical && h.generation == generation)
    }

    /// Dispatch an event to the matching transition.
    pub fn handle_event(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        match event {
            Event::Start(endpoint) => self.start(endpoint),
            Event::Stop => self.stop(),
            Event::Opened(generation) => self.on_open(generation, now),
            Event::Frame(generation, payload) => self.on_frame(generation, payload, now),
            Event::TimerFired(generation) => self.on_timer(generation, now),
            Event::Closed(generation, reason) => self.on_closed(generation, reason),
        }
    }

    /// Open a new handle. No-op while Opening or Streaming.
    pub fn start(&mut self, endpoint: StreamEndpoint) -> Vec<Effect> {
        if self.state.is_active() {
            tracing::debug!(state = self.state.label(), "Start ignored, stream already active");
            return Vec::new();
        }

        self.next_generation += 1;
        let generation = Generation(self.next_generation);
        self.handle = Some(ConnectionHandle {
            generation,
            canonical: true,
        });
        self.pacing.reset();
        self.pull = PullPhase::Idle;
        self.state = StreamState::Opening;
        self.endpoint = Some(endpoint.clone());
        self.stats.connections_started += 1;

        tracing::info!(%generation, endpoint = %endpoint, "Opening camera stream");
        vec![Effect::Open {
            generation,
            endpoint,
        }]
    }

    /// Tear down the live handle. No-op while Closed.
    pub fn stop(&mut self) -> Vec<Effect> {
        if !self.state.is_active() {
            tracing::debug!("Stop ignored, stream already closed");
            return Vec::new();
        }
        let Some(generation) = self.retire_handle() else {
            return Vec::new();
        };

        tracing::info!(%generation, "Stopping camera stream");
        self.close_effects(generation)
    }

    /// Transport opened: start the pull loop.
    pub fn on_open(&mut self, generation: Generation, now: Instant) -> Vec<Effect> {
        if !self.is_canonical(generation) {
            self.discard(generation, DiscardReason::StaleCallback, "open");
            return Vec::new();
        }
        if self.state != StreamState::Opening {
            self.discard(generation, DiscardReason::OutOfOrder, "open");
            return Vec::new();
        }

        self.state = StreamState::Streaming;
        self.pacing.on_open(now);
        tracing::info!(%generation, "Camera stream open");
        vec![self.send_pull(generation, now)]
    }

    /// Frame arrived: display it and schedule the next pull.
    pub fn on_frame(&mut self, generation: Generation, payload: Bytes, now: Instant) -> Vec<Effect> {
        if !self.is_canonical(generation) {
            self.discard(generation, DiscardReason::StaleCallback, "frame");
            return Vec::new();
        }
        if self.state != StreamState::Streaming || self.pull != PullPhase::InFlight {
            self.discard(generation, DiscardReason::Unsolicited, "frame");
            return Vec::new();
        }

        self.stats.frames_received += 1;
        self.pull = PullPhase::Scheduled;
        let delay = self.pacing.on_frame_received(now);

        tracing::trace!(
            %generation,
            bytes = payload.len(),
            delay_ms = delay.as_secs_f64() * 1000.0,
            latency_ms = self.pacing.state().smoothed_request_latency_ms,
            "Frame received"
        );
        vec![
            Effect::Display {
                generation,
                payload,
            },
            Effect::ArmTimer { generation, delay },
        ]
    }

    /// Pull timer elapsed: send the next pull.
    pub fn on_timer(&mut self, generation: Generation, now: Instant) -> Vec<Effect> {
        if !self.is_canonical(generation) {
            self.discard(generation, DiscardReason::StaleCallback, "timer");
            return Vec::new();
        }
        if self.state != StreamState::Streaming || self.pull != PullPhase::Scheduled {
            self.discard(generation, DiscardReason::OutOfOrder, "timer");
            return Vec::new();
        }
        vec![self.send_pull(generation, now)]
    }

    /// Transport ended on its own. Treated as a stop; there is no reconnect.
    pub fn on_closed(&mut self, generation: Generation, reason: CloseReason) -> Vec<Effect> {
        if !self.is_canonical(generation) {
            self.discard(generation, DiscardReason::StaleCallback, "close");
            return Vec::new();
        }
        let Some(generation) = self.retire_handle() else {
            return Vec::new();
        };

        match &reason {
            CloseReason::Remote => {
                tracing::info!(%generation, "Camera stream closed by server");
            }
            CloseReason::Failed(error) => {
                self.stats.connection_failures += 1;
                tracing::warn!(%generation, error = %error, "Camera stream connection failed");
            }
        }
        self.close_effects(generation)
    }

    fn send_pull(&mut self, generation: Generation, now: Instant) -> Effect {
        self.pull = PullPhase::InFlight;
        self.pacing.on_request_sent(now);
        self.stats.pulls_sent += 1;
        Effect::SendPull { generation }
    }

    /// Mark the live handle non-canonical and move to Closed.
    fn retire_handle(&mut self) -> Option<Generation> {
        let handle = self.handle.as_mut()?;
        handle.canonical = false;
        self.state = StreamState::Closed;
        Some(handle.generation)
    }

    fn close_effects(&mut self, generation: Generation) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if self.pull == PullPhase::Scheduled {
            effects.push(Effect::CancelTimer { generation });
        }
        self.pull = PullPhase::Idle;
        effects.push(Effect::Close { generation });
        effects
    }

    fn discard(&mut self, generation: Generation, reason: DiscardReason, what: &'static str) {
        match reason {
            DiscardReason::StaleCallback => self.stats.stale_discarded += 1,
            DiscardReason::Unsolicited => self.stats.unsolicited_discarded += 1,
            DiscardReason::OutOfOrder => {}
        }
        tracing::trace!(%generation, ?reason, event = what, state = self.state.label(), "Event discarded");
    }
}

impl Default for StreamConnection {
    fn default() -> Self {
        Self::new(crate::pacing::DEFAULT_TARGET_FPS)
    }
}
