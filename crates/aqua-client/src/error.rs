//! Client error types.

use thiserror::Error;

use crate::connection::AddressError;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the aquarium controller or logging
/// temperatures.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, TLS error, etc.).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Controller answered with a non-success status.
    #[error("Controller returned {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Invalid controller address.
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),

    /// A value to send was rejected before sending.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Temperature sensor produced no usable reading.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Local file access failed (sensor files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Controller state could not be decoded.
    #[error("Unexpected controller response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns `true` if the controller could not be reached at all.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_connect() || e.is_timeout())
    }
}
