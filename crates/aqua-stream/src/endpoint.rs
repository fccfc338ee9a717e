//! Camera stream endpoint parsing and normalization.
//!
//! The camera feed is served over a websocket by the controller's web server.
//! [`normalize_endpoint`] accepts the usual shorthand forms:
//! - Bare host:port (e.g., `gerty:8080/api/websocket` → `ws://gerty:8080/api/websocket`)
//! - Missing port (e.g., `ws://gerty/api/websocket` → `ws://gerty:8080/api/websocket`)
//! - IPv6 addresses (e.g., `[::1]:9000` → `ws://[::1]:9000/`)
//!
//! # Example
//!
//! ```
//! use aqua_stream::endpoint::StreamEndpoint;
//!
//! let endpoint = StreamEndpoint::parse("gerty:8080/api/websocket")?;
//! assert_eq!(endpoint.as_str(), "ws://gerty:8080/api/websocket");
//! assert!(!endpoint.is_secure());
//! # Ok::<(), aqua_stream::endpoint::EndpointError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Default port of the controller web server.
pub const DEFAULT_STREAM_PORT: u16 = 8080;

/// Default camera websocket address.
pub const DEFAULT_STREAM_URL: &str = "ws://gerty:8080/api/websocket";

/// Validated websocket address of the remote frame producer.
///
/// Immutable for the lifetime of a connection attempt; the stream connection
/// clones it into every `Open` effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    url: String,
    original: String,
}

impl StreamEndpoint {
    /// Parse and normalize a websocket URL.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let normalized = normalize_endpoint(input)?;
        Ok(Self {
            url: normalized.to_string(),
            original: input.trim().to_string(),
        })
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Returns the original input string before normalization.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Returns `true` if this endpoint uses TLS (`wss` scheme).
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.url.starts_with("wss://")
    }
}

impl FromStr for StreamEndpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Endpoint validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// Port could not be set
    InvalidPort(String),
    /// Unsupported URL scheme (only ws/wss allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for EndpointError {}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Endpoint cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::InvalidPort(e) => write!(f, "Invalid port: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use ws or wss)"),
        }
    }
}

/// Normalize a websocket URL string.
///
/// - Adds `ws://` scheme if missing
/// - Adds default port (8080) if missing
/// - Trims whitespace
pub fn normalize_endpoint(input: &str) -> Result<Url, EndpointError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(EndpointError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("ws://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "ws" && scheme != "wss" {
        return Err(EndpointError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(EndpointError::MissingHost);
    }

    if url.port().is_none() && !authority_has_port(&with_scheme) {
        url.set_port(Some(DEFAULT_STREAM_PORT))
            .map_err(|()| EndpointError::InvalidPort("Cannot set port on this URL".to_string()))?;
    }

    Ok(url)
}

/// Whether the authority names a port; the parser drops scheme-default ports.
fn authority_has_port(with_scheme: &str) -> bool {
    let rest = with_scheme
        .split_once("://")
        .map_or(with_scheme, |(_, rest)| rest);
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    match host_port.rfind(']') {
        Some(idx) => host_port[idx..].contains(':'),
        None => host_port.contains(':'),
    }
}
