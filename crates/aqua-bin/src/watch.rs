//! `aquarium watch`: run the camera viewer from the terminal.
//!
//! Visibility comes from stdin (`hide`, `show`), so a terminal session can
//! exercise the same start/stop path a hidden dashboard tab would.

use anyhow::{Context, Result};
use aqua_stream::{
    spawn_viewer, NullSurface, SnapshotSurface, StreamEndpoint, StreamState, ViewerConfig,
    ViewerHandle, ViewerReport, Visibility, WebSocketConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Resolved options for one watch session.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Camera websocket.
    pub url: String,
    /// Target frame rate.
    pub target_fps: u32,
    /// Text message that requests one frame.
    pub pull_token: String,
    /// Latest-frame file, if any.
    pub snapshot: Option<PathBuf>,
    /// Start hidden.
    pub hidden: bool,
    /// Websocket connect timeout.
    pub connect_timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Show,
    Hide,
    Retry,
    Status,
    Quit,
    Unknown(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Input::Empty,
        "show" | "visible" => Input::Show,
        "hide" | "hidden" => Input::Hide,
        "retry" | "reconnect" => Input::Retry,
        "status" => Input::Status,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

/// Run until `quit` or Ctrl-C. Closing stdin keeps the stream running.
pub async fn run(options: WatchOptions) -> Result<ViewerReport> {
    let endpoint = StreamEndpoint::parse(&options.url)
        .with_context(|| format!("invalid camera URL '{}'", options.url))?;
    let config = ViewerConfig::new(endpoint.clone()).with_target_fps(f64::from(options.target_fps));
    let connector = Arc::new(WebSocketConnector::new(
        options.pull_token.clone(),
        options.connect_timeout,
    ));
    let initial = Visibility::from_hidden(options.hidden);

    let viewer = match &options.snapshot {
        Some(path) => {
            tracing::info!(path = %path.display(), "Writing latest frame to snapshot file");
            spawn_viewer(config, connector, SnapshotSurface::new(path), initial)
        }
        None => spawn_viewer(config, connector, NullSurface, initial),
    };

    eprintln!(
        "Watching {endpoint} at {} fps. Commands: show, hide, retry, status, quit",
        options.target_fps
    );
    drive(&viewer).await;

    let report = viewer.shutdown().await?;
    Ok(report)
}

async fn drive(viewer: &ViewerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut status = viewer.status();
    let mut last_state = StreamState::Closed;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!();
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_input(&line) {
                    Input::Show => viewer.set_visibility(Visibility::Visible),
                    Input::Hide => viewer.set_visibility(Visibility::Hidden),
                    Input::Retry => {
                        if viewer.retry().await.is_err() {
                            break;
                        }
                    }
                    Input::Status => {
                        let current = *status.borrow();
                        eprintln!(
                            "{} | frames {} | {:.1} fps",
                            current.state.label(),
                            current.frames_displayed,
                            current.effective_fps
                        );
                    }
                    Input::Quit => break,
                    Input::Unknown(other) => eprintln!("Unknown command '{other}'"),
                    Input::Empty => {}
                },
                Ok(None) => {
                    tracing::debug!("stdin closed, streaming until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    // Viewer task ended on its own
                    break;
                }
                let current = *status.borrow_and_update();
                if current.state != last_state {
                    eprintln!("camera: {}", current.state.label());
                    last_state = current.state;
                }
            }
        }
    }
}

/// Human-readable end-of-session summary.
#[must_use]
pub fn summary(report: &ViewerReport) -> String {
    format!(
        "frames displayed: {}\nmalformed frames: {}\npulls sent: {}\nconnections: {} ({} failed)\nstale events discarded: {}\nunsolicited frames discarded: {}\neffective fps: {:.1}",
        report.sink.displayed,
        report.sink.malformed,
        report.stream.pulls_sent,
        report.stream.connections_started,
        report.stream.connection_failures,
        report.stream.stale_discarded,
        report.stream.unsolicited_discarded,
        report.effective_fps,
    )
}
