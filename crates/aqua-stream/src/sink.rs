//! Frame sink: decode payloads and keep exactly one displayed frame.
//!
//! Rendering always shows the most recent frame. There is no backlog: each
//! decoded frame replaces the previous one, which is dropped (and its pixel
//! buffer freed) at the moment of the swap.

use bytes::Bytes;
use image::DynamicImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::connection::Generation;
use crate::error::{Result, StreamError};

/// A decoded frame ready for display.
#[derive(Debug)]
pub struct Frame {
    sequence: u64,
    generation: Generation,
    received_at: Instant,
    encoded: Bytes,
    image: DynamicImage,
}

impl Frame {
    /// Position of this frame among all frames shown by the sink (1-based).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Connection that delivered the frame.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// When the payload was handed to the sink.
    #[must_use]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Payload exactly as received.
    #[must_use]
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    /// Decoded pixels.
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Where displayed frames go.
pub trait DisplaySurface: Send + 'static {
    /// Render `frame`, replacing whatever was shown.
    fn present(&mut self, frame: &Frame) -> io::Result<()>;

    /// Blank the surface.
    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Surface that discards frames (headless runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn present(&mut self, _frame: &Frame) -> io::Result<()> {
        Ok(())
    }
}

/// Surface that keeps the latest frame in a file.
///
/// The encoded payload is written to a sibling temp file and renamed over
/// the target, so readers never observe a half-written image.
#[derive(Debug, Clone)]
pub struct SnapshotSurface {
    path: PathBuf,
    staging: PathBuf,
}

impl SnapshotSurface {
    /// Snapshot into `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".part");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySurface for SnapshotSurface {
    fn present(&mut self, frame: &Frame) -> io::Result<()> {
        fs::write(&self.staging, frame.encoded())?;
        fs::rename(&self.staging, &self.path)
    }

    fn clear(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Sink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Frames decoded and swapped in.
    pub displayed: u64,
    /// Payloads that failed to decode.
    pub malformed: u64,
    /// Surface write failures.
    pub surface_errors: u64,
}

/// Single-slot frame buffer in front of a display surface.
pub struct FrameSink<S> {
    surface: S,
    current: Option<Frame>,
    stats: SinkStats,
}

impl<S: DisplaySurface> FrameSink<S> {
    /// Empty sink in front of `surface`.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            current: None,
            stats: SinkStats::default(),
        }
    }

    /// Currently displayed frame.
    #[must_use]
    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Underlying surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Decode `payload`, make it the current frame and present it.
    ///
    /// The previous frame is released before the new one is presented. A
    /// payload that does not decode leaves the current frame and the surface
    /// untouched.
    pub fn display(
        &mut self,
        generation: Generation,
        payload: Bytes,
        now: Instant,
    ) -> Result<&Frame> {
        let image = match image::load_from_memory(&payload) {
            Ok(image) => image,
            Err(source) => {
                self.stats.malformed += 1;
                return Err(StreamError::MalformedPayload {
                    len: payload.len(),
                    source,
                });
            }
        };

        if let Some(previous) = self.current.take() {
            tracing::trace!(sequence = previous.sequence(), "Released previous frame");
        }
        self.stats.displayed += 1;
        let frame = self.current.insert(Frame {
            sequence: self.stats.displayed,
            generation,
            received_at: now,
            encoded: payload,
            image,
        });

        if let Err(e) = self.surface.present(frame) {
            self.stats.surface_errors += 1;
            return Err(StreamError::Surface(e));
        }
        Ok(&*frame)
    }

    /// Release the current frame and blank the surface.
    pub fn clear(&mut self) -> Result<()> {
        self.current = None;
        self.surface.clear()?;
        Ok(())
    }
}
