//! Test utilities shared by unit tests and benchmarks
//!
//! Encoded fixtures are generated on the fly, so no binary test data lives in
//! the repository.

#![cfg(any(test, feature = "benchmark"))]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb};

use crate::decode::{DecodeError, Decoder, ImageDecoder};
use crate::render::{RenderError, RenderSink, RenderedFrame};
use crate::types::Image;

/// PNG-encode a solid `width` x `height` image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// JPEG-encode a solid `width` x `height` image.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = Image::from_pixel(width, height, Rgb([10, 20, 30]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).expect("encoding an in-memory image cannot fail");
    out.into_inner()
}

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Loopback peer address used by in-memory sources.
pub fn test_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// One call to [`RecordingSink::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendered {
    pub session: u64,
    pub sequence: u64,
    pub annotated: bool,
}

/// Sink that remembers what it was given and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Rendered>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<Rendered> {
        self.frames.lock().expect("sink lock").clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.frames().iter().map(|f| f.sequence).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().expect("sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make subsequent renders fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RenderSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn render(&self, frame: RenderedFrame) -> Result<(), RenderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::new("sink told to fail"));
        }
        self.frames.lock().expect("sink lock").push(Rendered {
            session: frame.session,
            sequence: frame.sequence,
            annotated: frame.annotated,
        });
        Ok(())
    }
}

/// Decoder that blocks every call until its gate is opened.
///
/// Lets a test hold a frame "in flight" inside the decode pool for as long
/// as it needs to.
#[derive(Debug, Default)]
pub struct GatedDecoder {
    open: Mutex<bool>,
    opened: Condvar,
    started: AtomicUsize,
}

impl GatedDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release every blocked and future decode.
    pub fn open(&self) {
        *self.open.lock().expect("gate lock") = true;
        self.opened.notify_all();
    }

    /// Number of decodes that have entered the decoder.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl Decoder for GatedDecoder {
    fn decode(&self, data: &[u8]) -> Result<Image, DecodeError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().map_err(|e| DecodeError::Other(e.to_string()))?;
        while !*open {
            open = self.opened.wait(open).map_err(|e| DecodeError::Other(e.to_string()))?;
        }
        drop(open);
        ImageDecoder.decode(data)
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}
