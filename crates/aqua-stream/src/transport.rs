//! Frame transport and per-connection link tasks.
//!
//! The viewer never touches a socket directly. Each connection handle gets a
//! link task that owns the [`Transport`], executes pull/close commands and
//! forwards what the socket produces as generation-tagged [`LinkEvent`]s.
//! Link tasks hold no viewer state, so the viewer's state machine stays the
//! only place where decisions are made.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connection::{CloseReason, Generation};
use crate::endpoint::StreamEndpoint;
use crate::error::{Result, StreamError};

/// Control token the camera server answers with one frame.
pub const DEFAULT_PULL_TOKEN: &str = "more";

/// An open, message-oriented link to the frame producer.
#[async_trait]
pub trait Transport: Send {
    /// Ask for exactly one frame.
    async fn request_frame(&mut self) -> Result<()>;

    /// Next frame payload; `None` once the remote side has closed.
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    async fn next_frame(&mut self) -> Option<Result<Bytes>>;

    /// Close the link.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint`.
    async fn connect(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn Transport>>;
}

/// Websocket connector for the controller's camera endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    pull_token: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Connector sending `pull_token` for every frame.
    pub fn new(pull_token: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            pull_token: pull_token.into(),
            connect_timeout,
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PULL_TOKEN, Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn Transport>> {
        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| {
                StreamError::Connection(format!(
                    "timed out after {:.1}s connecting to {}",
                    self.connect_timeout.as_secs_f64(),
                    endpoint
                ))
            })??;

        tracing::debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "Websocket handshake complete"
        );
        Ok(Box::new(WebSocketTransport {
            ws,
            pull_token: self.pull_token.clone(),
        }))
    }
}

/// Camera websocket: text pulls out, binary frames in.
pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pull_token: String,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn request_frame(&mut self) -> Result<()> {
        self.ws
            .send(Message::Text(self.pull_token.clone()))
            .await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Camera server sent close");
                    return None;
                }
                Ok(Message::Text(text)) => {
                    tracing::trace!(len = text.len(), "Ignoring text message from camera server");
                }
                // Ping/pong are answered by tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// What a link reports to the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Transport is open.
    Opened,
    /// One frame payload.
    Frame(Bytes),
    /// Transport ended; the link task is exiting.
    Closed(CloseReason),
}

/// Link events tagged with the handle they belong to.
pub type TaggedEvent = (Generation, LinkEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkCommand {
    Pull,
    Close,
}

/// Viewer-side handle of a running link task.
#[derive(Debug)]
pub(crate) struct LinkHandle {
    generation: Generation,
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue one pull. Returns false if the link task has already exited.
    pub(crate) fn pull(&self) -> bool {
        self.commands.send(LinkCommand::Pull).is_ok()
    }

    /// Ask the link to close its transport; returns the task to await.
    pub(crate) fn close(self) -> JoinHandle<()> {
        let _ = self.commands.send(LinkCommand::Close);
        self.task
    }
}

/// Spawn the link task for one connection handle.
pub(crate) fn spawn_link(
    connector: Arc<dyn Connector>,
    generation: Generation,
    endpoint: StreamEndpoint,
    events: mpsc::UnboundedSender<TaggedEvent>,
) -> LinkHandle {
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_link(connector, generation, endpoint, events, commands_rx));
    LinkHandle {
        generation,
        commands,
        task,
    }
}

async fn run_link(
    connector: Arc<dyn Connector>,
    generation: Generation,
    endpoint: StreamEndpoint,
    events: mpsc::UnboundedSender<TaggedEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let connected = tokio::select! {
        result = connector.connect(&endpoint) => result,
        () = closed_before_open(&mut commands) => {
            tracing::debug!(%generation, "Link closed before transport opened");
            return;
        }
    };
    let mut transport = match connected {
        Ok(transport) => transport,
        Err(e) => {
            let _ = events.send((generation, LinkEvent::Closed(CloseReason::Failed(e.to_string()))));
            return;
        }
    };
    if events.send((generation, LinkEvent::Opened)).is_err() {
        let _ = transport.close().await;
        return;
    }

    let mut frames = 0u64;
    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Pull) => {
                    if let Err(e) = transport.request_frame().await {
                        break Some(CloseReason::Failed(e.to_string()));
                    }
                }
                // Viewer-initiated close needs no report back
                Some(LinkCommand::Close) | None => break None,
            },
            frame = transport.next_frame() => match frame {
                Some(Ok(payload)) => {
                    frames += 1;
                    if events.send((generation, LinkEvent::Frame(payload))).is_err() {
                        break None;
                    }
                }
                Some(Err(e)) => break Some(CloseReason::Failed(e.to_string())),
                None => break Some(CloseReason::Remote),
            },
        }
    };

    if let Err(e) = transport.close().await {
        tracing::debug!(%generation, error = %e, "Error closing camera transport");
    }
    tracing::debug!(%generation, frames, "Link task exited");
    if let Some(reason) = reason {
        let _ = events.send((generation, LinkEvent::Closed(reason)));
    }
}

/// Resolves once the viewer closes the link; pulls cannot precede the open.
async fn closed_before_open(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    while let Some(command) = commands.recv().await {
        if command == LinkCommand::Close {
            return;
        }
    }
}
