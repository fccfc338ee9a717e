//! Controller address configuration and URL normalization.
//!
//! - [`ControllerAddress`]: Validated API base URL with source tracking
//! - [`AddressSource`]: Where the address configuration came from
//! - [`AddressError`]: User-friendly validation errors
//!
//! # Address Resolution Precedence
//!
//! Addresses are resolved in this order (highest priority first):
//! 1. `--api-url` on the command line
//! 2. `controller.api_url` from the config file
//! 3. `AQUARIUM_API_URL` environment variable
//! 4. Default: `http://gerty:8080/api`
//!
//! # URL Normalization
//!
//! The [`normalize_url`] function handles common input formats:
//! - Bare host:port (e.g., `gerty:8080/api` → `http://gerty:8080/api`)
//! - Missing port (e.g., `http://gerty/api` → `http://gerty:8080/api`)
//! - IPv6 addresses (e.g., `[::1]:9000` → `http://[::1]:9000/`)
//!
//! # Example
//!
//! ```
//! use aqua_client::connection::{AddressSource, ControllerAddress};
//!
//! let addr = ControllerAddress::parse("gerty/api", AddressSource::CommandLine)?;
//! assert_eq!(addr.as_str(), "http://gerty:8080/api");
//! assert_eq!(addr.endpoint("controller/aqua"), "http://gerty:8080/api/controller/aqua");
//! # Ok::<(), aqua_client::connection::AddressError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Environment variable consulted when neither CLI nor config give an address.
pub const API_URL_ENV: &str = "AQUARIUM_API_URL";

/// Default port of the controller web server.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Default API base when no configuration is provided.
pub const DEFAULT_API_URL: &str = "http://gerty:8080/api";

/// Source of the controller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    /// Hardcoded default (`http://gerty:8080/api`)
    Default,
    /// Loaded from `AQUARIUM_API_URL`
    Environment,
    /// Read from the config file
    Config,
    /// Passed with `--api-url`
    CommandLine,
}

impl AddressSource {
    /// Returns the priority for address resolution (higher = preferred).
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Environment => 1,
            Self::Config => 2,
            Self::CommandLine => 3,
        }
    }

    /// Returns a short label for log output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Environment => "env",
            Self::Config => "config",
            Self::CommandLine => "cli",
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Environment => write!(f, "Environment ({API_URL_ENV})"),
            Self::Config => write!(f, "Config file"),
            Self::CommandLine => write!(f, "Command line"),
        }
    }
}

/// Validated controller API base URL with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerAddress {
    /// The normalized URL (always has scheme and port)
    url: String,
    /// Where this address came from
    source: AddressSource,
    /// Original input string (for display/debugging)
    original: String,
}

impl ControllerAddress {
    /// Parse and normalize an API base URL.
    pub fn parse(input: &str, source: AddressSource) -> Result<Self, AddressError> {
        let normalized = normalize_url(input)?;
        Ok(Self {
            url: normalized.to_string(),
            source,
            original: input.to_string(),
        })
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Returns where this address came from.
    #[must_use]
    pub fn source(&self) -> AddressSource {
        self.source
    }

    /// Returns the original input string before normalization.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Returns `true` if this address uses TLS (https scheme).
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("https://")
    }

    /// Full URL of an API route below the base path.
    #[must_use]
    pub fn endpoint(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }
}

impl FromStr for ControllerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, AddressSource::CommandLine)
    }
}

impl fmt::Display for ControllerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl Default for ControllerAddress {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            source: AddressSource::Default,
            original: DEFAULT_API_URL.to_string(),
        }
    }
}

/// URL validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// Port could not be set
    InvalidPort(String),
    /// Unsupported URL scheme (only http/https allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for AddressError {}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Address cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::InvalidPort(e) => write!(f, "Invalid port: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use http or https)"),
        }
    }
}

/// Normalize an API base URL string.
///
/// - Adds `http://` scheme if missing
/// - Adds default port (8080) if missing
/// - Keeps the base path (`/api`)
/// - Trims whitespace
pub fn normalize_url(input: &str) -> Result<Url, AddressError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(AddressError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| AddressError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AddressError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(AddressError::MissingHost);
    }

    if url.port().is_none() && !authority_has_port(&with_scheme) {
        url.set_port(Some(DEFAULT_API_PORT))
            .map_err(|()| AddressError::InvalidPort("Cannot set port on this URL".to_string()))?;
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

/// Resolve the controller address from multiple sources with precedence.
///
/// Invalid candidates are skipped with a warning; never fails, falls back to
/// the default.
#[must_use]
pub fn resolve_address(cli: Option<&str>, config: Option<&str>) -> ControllerAddress {
    let env = std::env::var(API_URL_ENV).ok();
    let candidates = [
        (cli, AddressSource::CommandLine),
        (config, AddressSource::Config),
        (env.as_deref(), AddressSource::Environment),
    ];

    for (input, source) in candidates {
        let Some(input) = input.filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        match ControllerAddress::parse(input, source) {
            Ok(addr) => return addr,
            Err(e) => tracing::warn!(source = source.label(), input, error = %e, "Ignoring invalid controller address"),
        }
    }

    ControllerAddress::default()
}
