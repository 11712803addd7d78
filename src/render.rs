//! Render sinks: where finished frames go.
//!
//! Rendering is the last step of every pipeline iteration. A sink failure is
//! logged and counted by the caller, never treated as fatal.

use futures::{Stream, StreamExt};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

use crate::types::Image;

/// Why a sink could not accept a frame.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct RenderError(String);

impl RenderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A processed frame ready for display.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// Session that produced it
    pub session: u64,
    /// Arrival sequence of the source frame
    pub sequence: u64,
    /// Final raster
    pub image: Image,
    /// False when the processor faulted and the plain decode is shown
    pub annotated: bool,
    /// When the encoded frame arrived
    pub received_at: Instant,
}

impl RenderedFrame {
    /// Time from arrival to now
    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// Destination for rendered frames.
///
/// One sink instance is shared by every session, so implementations must be
/// safe to call concurrently.
pub trait RenderSink: Send + Sync + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Display or forward one frame
    fn render(&self, frame: RenderedFrame) -> Result<(), RenderError>;
}

/// Logs each frame and discards it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RenderSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn render(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        trace!(
            session = frame.session,
            sequence = frame.sequence,
            width = frame.image.width(),
            height = frame.image.height(),
            annotated = frame.annotated,
            age = ?frame.age(),
            "Rendered frame"
        );
        Ok(())
    }
}

/// Publishes the latest frame to any number of local viewers.
///
/// Viewers that fall behind skip straight to the newest frame, the same
/// freshness rule the relay applies to its producer.
#[derive(Debug)]
pub struct WatchSink {
    tx: watch::Sender<Option<Arc<RenderedFrame>>>,
}

impl Default for WatchSink {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Most recent frame, if any
    pub fn latest(&self) -> Option<Arc<RenderedFrame>> {
        self.tx.borrow().clone()
    }

    /// Stream of frames, starting with the current one if present
    pub fn subscribe(&self) -> impl Stream<Item = Arc<RenderedFrame>> + 'static {
        WatchStream::new(self.tx.subscribe()).filter_map(|opt| async move { opt })
    }
}

impl RenderSink for WatchSink {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn render(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        // send_replace succeeds even with no subscribers.
        self.tx.send_replace(Some(Arc::new(frame)));
        Ok(())
    }
}

/// Overwrites one image file with the latest frame.
///
/// The file is written next to its final location and renamed into place,
/// so readers never observe a partial image.
#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    staging: PathBuf,
    format: ImageFormat,
}

impl SnapshotSink {
    /// The image format is taken from the file extension.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RenderError> {
        let path = path.as_ref().to_path_buf();
        let format = ImageFormat::from_path(&path)
            .map_err(|e| RenderError::new(format!("{}: {}", path.display(), e)))?;
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");
        Ok(Self { path, staging: staging.into(), format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RenderSink for SnapshotSink {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn render(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        frame
            .image
            .save_with_format(&self.staging, self.format)
            .map_err(|e| RenderError::new(e.to_string()))?;
        std::fs::rename(&self.staging, &self.path).map_err(|e| RenderError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Duration;

    fn rendered(sequence: u64) -> RenderedFrame {
        RenderedFrame {
            session: 1,
            sequence,
            image: Image::from_pixel(4, 4, Rgb([9, 9, 9])),
            annotated: true,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn log_sink_accepts_everything() {
        LogSink.render(rendered(1)).unwrap();
    }

    #[tokio::test]
    async fn watch_sink_keeps_only_the_latest() {
        let sink = WatchSink::new();
        assert!(sink.latest().is_none());

        sink.render(rendered(1)).unwrap();
        let mut frames = Box::pin(sink.subscribe());
        sink.render(rendered(2)).unwrap();
        sink.render(rendered(3)).unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), frames.next()).await.unwrap();
        assert_eq!(next.map(|f| f.sequence), Some(3));
        assert_eq!(sink.latest().map(|f| f.sequence), Some(3));
    }

    #[test]
    fn snapshot_sink_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let sink = SnapshotSink::new(&path).unwrap();

        sink.render(rendered(1)).unwrap();
        sink.render(rendered(2)).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (4, 4));
        assert!(!dir.path().join("latest.png.partial").exists());
    }

    #[test]
    fn snapshot_sink_needs_a_known_extension() {
        assert!(SnapshotSink::new("/tmp/latest.unknown").is_err());
    }
}
