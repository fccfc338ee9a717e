//! Maps viewer visibility to stream start/stop.

use crate::connection::{Effect, StreamConnection};
use crate::endpoint::StreamEndpoint;

/// Whether the viewing surface can currently be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Surface is shown; the stream should run.
    #[default]
    Visible,
    /// Surface is hidden; the stream should be torn down.
    Hidden,
}

impl Visibility {
    /// Build from a page-style "hidden" flag.
    #[must_use]
    pub fn from_hidden(is_hidden: bool) -> Self {
        if is_hidden {
            Self::Hidden
        } else {
            Self::Visible
        }
    }

    /// Returns true for [`Visibility::Hidden`].
    #[must_use]
    pub fn is_hidden(self) -> bool {
        matches!(self, Self::Hidden)
    }
}

/// Decides whether a stream connection should exist.
///
/// Both directions rely on the idempotence of [`StreamConnection::start`] and
/// [`StreamConnection::stop`], so duplicate notifications are harmless.
#[derive(Debug, Clone)]
pub struct VisibilityGate {
    endpoint: StreamEndpoint,
    last: Option<Visibility>,
}

impl VisibilityGate {
    /// Gate that starts streams against `endpoint`.
    #[must_use]
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self {
            endpoint,
            last: None,
        }
    }

    /// Endpoint used for every start.
    #[must_use]
    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    /// Last visibility applied, `None` before initialization.
    #[must_use]
    pub fn visibility(&self) -> Option<Visibility> {
        self.last
    }

    /// Apply the visibility current at construction time.
    pub fn initialize(&mut self, current: Visibility, conn: &mut StreamConnection) -> Vec<Effect> {
        self.on_visibility_change(current.is_hidden(), conn)
    }

    /// Hidden stops the stream, visible starts it.
    pub fn on_visibility_change(
        &mut self,
        is_hidden: bool,
        conn: &mut StreamConnection,
    ) -> Vec<Effect> {
        let visibility = Visibility::from_hidden(is_hidden);
        if self.last == Some(visibility) {
            tracing::trace!(?visibility, "Repeated visibility notification");
        }
        self.last = Some(visibility);

        match visibility {
            Visibility::Hidden => conn.stop(),
            Visibility::Visible => conn.start(self.endpoint.clone()),
        }
    }

    /// Explicit user reconnect: start again if visible and the stream has
    /// closed (for example after a connection failure).
    pub fn retry(&mut self, conn: &mut StreamConnection) -> Vec<Effect> {
        match self.last {
            Some(Visibility::Visible) => conn.start(self.endpoint.clone()),
            _ => {
                tracing::debug!("Retry ignored while hidden");
                Vec::new()
            }
        }
    }
}
