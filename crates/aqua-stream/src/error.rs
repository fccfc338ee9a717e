//! Stream error types.

use thiserror::Error;

use crate::endpoint::EndpointError;

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while streaming camera frames.
///
/// None of these are fatal to the caller: a connection error closes the
/// stream (resumable by a fresh start) and a malformed payload only skips
/// the display of one frame.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Stream endpoint could not be parsed.
    #[error("Invalid stream endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// Websocket protocol or I/O error.
    #[error("Websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Transport failed to open or dropped unexpectedly.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Payload could not be decoded as an image.
    #[error("Malformed frame payload ({len} bytes): {source}")]
    MalformedPayload {
        /// Size of the rejected payload.
        len: usize,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Display surface failed to present a frame.
    #[error("Display surface error: {0}")]
    Surface(#[from] std::io::Error),

    /// The viewer task is gone.
    #[error("Viewer is not running")]
    ViewerClosed,
}

impl StreamError {
    /// Returns `true` if this error came from the link rather than from a frame.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Connection(_))
    }
}
