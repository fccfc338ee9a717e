//! Pull-paced camera stream client for the aquarium controller.
//!
//! The controller serves its camera over a websocket that sends exactly one
//! encoded frame per text "pull" it receives. This crate keeps one pull in
//! flight, paces pulls to a target frame rate corrected by the measured
//! round-trip latency, shows only the most recent frame, and tears the
//! stream down whenever the viewer is hidden.
//!
//! - [`pacing`]: latency-compensated delay between pulls
//! - [`connection`]: sans-IO connection state machine
//! - [`visibility`]: visibility to start/stop mapping
//! - [`sink`]: single-frame decode and display
//! - [`transport`]: websocket transport and link tasks
//! - [`viewer`]: the single-task runtime tying it together

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod pacing;
pub mod sink;
pub mod transport;
pub mod viewer;
pub mod visibility;

pub use connection::{
    CloseReason, ConnectionHandle, Effect, Event, Generation, PullPhase, StreamConnection,
    StreamState, StreamStats,
};
pub use endpoint::{
    normalize_endpoint, EndpointError, StreamEndpoint, DEFAULT_STREAM_PORT, DEFAULT_STREAM_URL,
};
pub use error::{Result, StreamError};
pub use pacing::{PacingController, PacingState, DEFAULT_TARGET_FPS, MIN_TARGET_FPS};
pub use sink::{DisplaySurface, Frame, FrameSink, NullSurface, SinkStats, SnapshotSurface};
pub use transport::{Connector, Transport, WebSocketConnector, DEFAULT_PULL_TOKEN};
pub use viewer::{
    spawn_viewer, CameraViewer, ViewerCommand, ViewerConfig, ViewerHandle, ViewerReport,
    ViewerStatus,
};
pub use visibility::{Visibility, VisibilityGate};
