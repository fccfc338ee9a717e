//! Camera viewer runtime.
//!
//! One tokio task owns the [`StreamConnection`], the [`VisibilityGate`], the
//! [`FrameSink`] and the single pull timer. It handles one input at a time
//! from a `select!` over visibility changes, control commands, link events
//! and the timer, feeds it to the state machine and executes the returned
//! effects. Link tasks only forward generation-tagged events into the
//! viewer's channel, so nothing else ever mutates viewer state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connection::{Effect, Generation, StreamConnection, StreamState, StreamStats};
use crate::endpoint::StreamEndpoint;
use crate::error::{Result, StreamError};
use crate::pacing::DEFAULT_TARGET_FPS;
use crate::sink::{DisplaySurface, FrameSink, SinkStats};
use crate::transport::{spawn_link, Connector, LinkEvent, LinkHandle, TaggedEvent};
use crate::visibility::{Visibility, VisibilityGate};

/// How long shutdown waits for each link to close its transport.
const LINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Viewer construction parameters.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Camera websocket.
    pub endpoint: StreamEndpoint,
    /// Pull pacing target.
    pub target_fps: f64,
}

impl ViewerConfig {
    /// Config for `endpoint` at the default frame rate.
    #[must_use]
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self {
            endpoint,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }

    /// Override the frame rate.
    #[must_use]
    pub fn with_target_fps(mut self, target_fps: f64) -> Self {
        self.target_fps = target_fps;
        self
    }
}

/// Control input besides visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    /// Reconnect after the stream closed on its own. Ignored while hidden.
    Retry,
    /// Stop streaming and end the runtime.
    Shutdown,
}

/// Snapshot published after every handled input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerStatus {
    /// Connection lifecycle state.
    pub state: StreamState,
    /// Live handle, if any.
    pub generation: Option<Generation>,
    /// Frames swapped into the sink so far.
    pub frames_displayed: u64,
    /// Frame rate implied by the smoothed interval of the live handle.
    pub effective_fps: f64,
}

impl Default for ViewerStatus {
    fn default() -> Self {
        Self {
            state: StreamState::Closed,
            generation: None,
            frames_displayed: 0,
            effective_fps: 0.0,
        }
    }
}

/// Final counters returned when the runtime ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerReport {
    /// Connection counters.
    pub stream: StreamStats,
    /// Sink counters.
    pub sink: SinkStats,
    /// Effective frame rate at shutdown.
    pub effective_fps: f64,
}

#[derive(Debug, Clone, Copy)]
struct PullTimer {
    generation: Generation,
    deadline: Instant,
}

/// Single-task camera viewer.
pub struct CameraViewer<S> {
    connection: StreamConnection,
    gate: VisibilityGate,
    sink: FrameSink<S>,
    connector: Arc<dyn Connector>,
    link: Option<LinkHandle>,
    timer: Option<PullTimer>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    closing: Vec<JoinHandle<()>>,
    status: watch::Sender<ViewerStatus>,
}

impl<S: DisplaySurface> CameraViewer<S> {
    /// Closed viewer; nothing connects until [`CameraViewer::run`].
    pub fn new(config: ViewerConfig, connector: Arc<dyn Connector>, surface: S) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ViewerStatus::default());
        Self {
            connection: StreamConnection::new(config.target_fps),
            gate: VisibilityGate::new(config.endpoint),
            sink: FrameSink::new(surface),
            connector,
            link: None,
            timer: None,
            events_tx,
            events_rx,
            closing: Vec::new(),
            status,
        }
    }

    /// Receiver of status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewerStatus> {
        self.status.subscribe()
    }

    /// Run until [`ViewerCommand::Shutdown`] or until the command sender is
    /// dropped. A dropped visibility sender freezes the last visibility.
    pub async fn run(
        mut self,
        mut visibility: watch::Receiver<Visibility>,
        mut commands: mpsc::Receiver<ViewerCommand>,
    ) -> ViewerReport {
        let initial = *visibility.borrow_and_update();
        tracing::debug!(?initial, endpoint = %self.gate.endpoint(), "Camera viewer starting");
        let effects = self.gate.initialize(initial, &mut self.connection);
        self.apply(effects);
        self.publish_status();

        let mut visibility_open = true;
        loop {
            let deadline = self.timer.map(|timer| timer.deadline);
            tokio::select! {
                changed = visibility.changed(), if visibility_open => {
                    if changed.is_ok() {
                        let current = *visibility.borrow_and_update();
                        let effects = self
                            .gate
                            .on_visibility_change(current.is_hidden(), &mut self.connection);
                        self.apply(effects);
                    } else {
                        visibility_open = false;
                    }
                }
                command = commands.recv() => match command {
                    Some(ViewerCommand::Retry) => {
                        let effects = self.gate.retry(&mut self.connection);
                        self.apply(effects);
                    }
                    Some(ViewerCommand::Shutdown) | None => break,
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_link_event(generation, event);
                }
                () = sleep_until(deadline) => {
                    if let Some(timer) = self.timer.take() {
                        let effects = self.connection.on_timer(timer.generation, clock_now());
                        self.apply(effects);
                    }
                }
            }
            self.closing.retain(|task| !task.is_finished());
            self.publish_status();
        }

        self.shutdown().await
    }

    fn on_link_event(&mut self, generation: Generation, event: LinkEvent) {
        let now = clock_now();
        let effects = match event {
            LinkEvent::Opened => self.connection.on_open(generation, now),
            LinkEvent::Frame(payload) => self.connection.on_frame(generation, payload, now),
            LinkEvent::Closed(reason) => self.connection.on_closed(generation, reason),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open {
                    generation,
                    endpoint,
                } => {
                    if let Some(previous) = self.link.take() {
                        self.closing.push(previous.close());
                    }
                    self.link = Some(spawn_link(
                        self.connector.clone(),
                        generation,
                        endpoint,
                        self.events_tx.clone(),
                    ));
                }
                Effect::SendPull { generation } => match &self.link {
                    Some(link) if link.generation() == generation => {
                        if !link.pull() {
                            tracing::debug!(%generation, "Link gone before pull could be sent");
                        }
                    }
                    _ => tracing::warn!(%generation, "No link for pull"),
                },
                Effect::Display {
                    generation,
                    payload,
                } => match self.sink.display(generation, payload, clock_now()) {
                    Ok(frame) => tracing::trace!(
                        %generation,
                        sequence = frame.sequence(),
                        width = frame.width(),
                        height = frame.height(),
                        "Frame displayed"
                    ),
                    Err(e) => tracing::warn!(%generation, error = %e, "Frame not displayed"),
                },
                Effect::ArmTimer { generation, delay } => {
                    self.timer = Some(PullTimer {
                        generation,
                        deadline: Instant::now() + delay,
                    });
                }
                Effect::CancelTimer { generation } => {
                    if self.timer.is_some_and(|timer| timer.generation == generation) {
                        self.timer = None;
                    }
                }
                Effect::Close { generation } => {
                    if self
                        .link
                        .as_ref()
                        .is_some_and(|link| link.generation() == generation)
                    {
                        if let Some(link) = self.link.take() {
                            self.closing.push(link.close());
                        }
                    }
                }
            }
        }
    }

    fn publish_status(&self) {
        let generation = self
            .connection
            .handle()
            .filter(|handle| handle.is_canonical())
            .map(|handle| handle.generation());
        self.status.send_replace(ViewerStatus {
            state: self.connection.state(),
            generation,
            frames_displayed: self.sink.stats().displayed,
            effective_fps: self.connection.pacing().effective_fps(),
        });
    }

    async fn shutdown(mut self) -> ViewerReport {
        let effects = self.connection.stop();
        self.apply(effects);
        self.publish_status();

        for task in std::mem::take(&mut self.closing) {
            let abort = task.abort_handle();
            match tokio::time::timeout(LINK_CLOSE_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Link task failed"),
                Err(_) => {
                    tracing::warn!("Link did not close in time, aborting");
                    abort.abort();
                }
            }
        }

        let report = ViewerReport {
            stream: self.connection.stats(),
            sink: self.sink.stats(),
            effective_fps: self.connection.pacing().effective_fps(),
        };
        tracing::info!(
            frames = report.sink.displayed,
            pulls = report.stream.pulls_sent,
            connections = report.stream.connections_started,
            failures = report.stream.connection_failures,
            "Camera viewer stopped"
        );
        report
    }
}

/// Handle to a viewer running in its own task.
#[derive(Debug)]
pub struct ViewerHandle {
    visibility: watch::Sender<Visibility>,
    commands: mpsc::Sender<ViewerCommand>,
    status: watch::Receiver<ViewerStatus>,
    task: JoinHandle<ViewerReport>,
}

impl ViewerHandle {
    /// Report a visibility change. Repeats are harmless.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    /// Reconnect after the stream closed on its own.
    pub async fn retry(&self) -> Result<()> {
        self.commands
            .send(ViewerCommand::Retry)
            .await
            .map_err(|_| StreamError::ViewerClosed)
    }

    /// Status updates.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    /// Stop streaming, wait for the runtime to finish and return its counters.
    pub async fn shutdown(self) -> Result<ViewerReport> {
        // A closed channel means the runtime already ended; its report is still
        // in the join handle.
        let _ = self.commands.send(ViewerCommand::Shutdown).await;
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "Viewer task failed");
            StreamError::ViewerClosed
        })
    }
}

/// Spawn a viewer that starts with `initial` visibility.
pub fn spawn_viewer<S: DisplaySurface>(
    config: ViewerConfig,
    connector: Arc<dyn Connector>,
    surface: S,
    initial: Visibility,
) -> ViewerHandle {
    let viewer = CameraViewer::new(config, connector, surface);
    let status = viewer.subscribe();
    let (visibility, visibility_rx) = watch::channel(initial);
    let (commands, commands_rx) = mpsc::channel(8);
    let task = tokio::spawn(viewer.run(visibility_rx, commands_rx));
    ViewerHandle {
        visibility,
        commands,
        status,
        task,
    }
}

/// Current time on the tokio clock, so paused-time tests drive pacing.
fn clock_now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::{png, RecordingSurface};
    use crate::sink::NullSurface;
    use crate::transport::tests::FakeConnector;
    use bytes::Bytes;
    use tokio::sync::Notify;

    fn config() -> ViewerConfig {
        ViewerConfig::new(StreamEndpoint::parse("ws://gerty:8080/api/websocket").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_loop_keeps_one_pull_in_flight() {
        let (connector, mut remotes) = FakeConnector::new();
        let surface = RecordingSurface::default();
        let viewer = spawn_viewer(
            config(),
            Arc::new(connector),
            surface.clone(),
            Visibility::Visible,
        );

        let mut remote = remotes.recv().await.unwrap();
        remote.pulls.recv().await.unwrap();

        for _ in 0..3 {
            assert!(remote.pulls.try_recv().is_err());
            let sent_at = Instant::now();
            remote.send_frame(png(4, 3));
            remote.pulls.recv().await.unwrap();
            // Zero latency on a paused clock: the full 1000/24 ms interval
            assert!(sent_at.elapsed() >= Duration::from_millis(41));
            assert!(sent_at.elapsed() < Duration::from_millis(43));
        }

        // Nothing more is requested until the frame arrives
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(remote.pulls.try_recv().is_err());

        let report = viewer.shutdown().await.unwrap();
        assert!(remote.is_closed());
        assert_eq!(report.stream.pulls_sent, 4);
        assert_eq!(report.stream.frames_received, 3);
        assert_eq!(report.sink.displayed, 3);
        assert_eq!(
            surface.presented.lock().unwrap().clone(),
            vec![(1, 4, 3), (2, 4, 3), (3, 4, 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_still_schedules_next_pull() {
        let (connector, mut remotes) = FakeConnector::new();
        let viewer = spawn_viewer(config(), Arc::new(connector), NullSurface, Visibility::Visible);

        let mut remote = remotes.recv().await.unwrap();
        remote.pulls.recv().await.unwrap();
        remote.send_frame(Bytes::from_static(b"definitely not an image"));
        remote.pulls.recv().await.unwrap();
        remote.send_frame(png(2, 2));
        remote.pulls.recv().await.unwrap();

        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.sink.malformed, 1);
        assert_eq!(report.sink.displayed, 1);
        assert_eq!(report.stream.frames_received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_closes_link_and_show_reopens() {
        let (connector, mut remotes) = FakeConnector::new();
        let viewer = spawn_viewer(config(), Arc::new(connector), NullSurface, Visibility::Visible);

        let mut first = remotes.recv().await.unwrap();
        first.pulls.recv().await.unwrap();

        viewer.set_visibility(Visibility::Hidden);
        // Transport dropped by the link task
        assert!(first.pulls.recv().await.is_none());
        assert!(first.is_closed());

        // Late frame from the old socket goes nowhere
        let _ = first.frames.send(Some(png(2, 2)));

        viewer.set_visibility(Visibility::Visible);
        let mut second = remotes.recv().await.unwrap();
        second.pulls.recv().await.unwrap();

        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.stream.connections_started, 2);
        assert_eq!(report.stream.pulls_sent, 2);
        assert_eq!(report.sink.displayed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_waits_for_retry() {
        let (connector, mut remotes) = FakeConnector::new();
        let viewer = spawn_viewer(config(), Arc::new(connector), NullSurface, Visibility::Visible);
        let mut status = viewer.status();

        let mut remote = remotes.recv().await.unwrap();
        remote.pulls.recv().await.unwrap();
        assert_eq!(status.borrow().state, StreamState::Streaming);

        remote.hang_up();
        status
            .wait_for(|s| s.state == StreamState::Closed)
            .await
            .unwrap();

        // No automatic reconnect
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(remotes.try_recv().is_err());

        viewer.retry().await.unwrap();
        let mut again = remotes.recv().await.unwrap();
        again.pulls.recv().await.unwrap();

        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.stream.connections_started, 2);
        assert_eq!(report.stream.connection_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_is_not_retried() {
        let viewer = spawn_viewer(
            config(),
            Arc::new(FakeConnector::refusing()),
            NullSurface,
            Visibility::Visible,
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.stream.connections_started, 1);
        assert_eq!(report.stream.connection_failures, 1);
        assert_eq!(report.stream.pulls_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_at_start_never_connects() {
        let (connector, mut remotes) = FakeConnector::new();
        let viewer = spawn_viewer(config(), Arc::new(connector), NullSurface, Visibility::Hidden);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(remotes.try_recv().is_err());

        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.stream, StreamStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_before_open_leaves_no_socket() {
        let gate = Arc::new(Notify::new());
        let (connector, mut remotes) = FakeConnector::gated(gate.clone());
        let viewer = spawn_viewer(config(), Arc::new(connector), NullSurface, Visibility::Hidden);
        let mut status = viewer.status();

        viewer.set_visibility(Visibility::Visible);
        status
            .wait_for(|s| s.state == StreamState::Opening)
            .await
            .unwrap();
        viewer.set_visibility(Visibility::Hidden);
        status
            .wait_for(|s| s.state == StreamState::Closed)
            .await
            .unwrap();
        gate.notify_waiters();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let report = viewer.shutdown().await.unwrap();
        assert_eq!(report.stream.connections_started, 1);
        assert_eq!(report.stream.pulls_sent, 0);
        assert!(remotes.try_recv().is_err());
    }
}
