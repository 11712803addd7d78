//! Frame decoding and the bounded pool it runs on.
//!
//! Decoding a 1080p JPEG costs several milliseconds of CPU. Running it on the
//! async worker that also drains the socket would stall ingress, so every
//! decode is moved onto the blocking thread pool through [`DecodePool`], which
//! caps how many decodes may run at once across all sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::types::{Frame, Image};
use crate::{RelayError, Result};

/// Why a payload could not be turned into an image.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error(transparent)]
    Codec(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}

/// Turns encoded bytes into an RGB raster.
///
/// Implementations run on blocking threads and may be called from several
/// sessions concurrently.
pub trait Decoder: Send + Sync + 'static {
    /// Decode one encoded frame
    fn decode(&self, data: &[u8]) -> Result<Image, DecodeError>;

    /// Short name used in logs
    fn name(&self) -> &'static str {
        "decoder"
    }
}

/// Decoder backed by the `image` crate; the format is guessed from the
/// payload's magic bytes (JPEG and PNG are enabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<Image, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(image::load_from_memory(data)?.to_rgb8())
    }

    fn name(&self) -> &'static str {
        "image"
    }
}

/// A successfully decoded frame.
#[derive(Debug)]
pub struct Decoded {
    /// Sequence of the frame it came from
    pub sequence: u64,
    /// Decoded raster
    pub image: Image,
    /// Time spent inside the decoder
    pub latency: Duration,
}

/// Bounded worker pool for decode work.
///
/// Each submission holds a semaphore permit for as long as the decode
/// actually runs. Dropping the future returned by [`decode`](Self::decode)
/// abandons the result but lets the blocking work finish and release its
/// permit, so cancelled sessions never leak pool capacity.
#[derive(Clone)]
pub struct DecodePool {
    decoder: Arc<dyn Decoder>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl std::fmt::Debug for DecodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodePool")
            .field("decoder", &self.decoder.name())
            .field("workers", &self.workers)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl DecodePool {
    /// Create a pool running `decoder` on at most `workers` threads at once
    pub fn new(decoder: Arc<dyn Decoder>, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(RelayError::invalid_config("decode pool needs at least one worker"));
        }
        debug!(workers, decoder = decoder.name(), "Decode pool created");
        Ok(Self { decoder, permits: Arc::new(Semaphore::new(workers)), workers })
    }

    /// Default pool size: half the available parallelism, at least one.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism().map(|n| (n.get() / 2).max(1)).unwrap_or(1)
    }

    /// Configured number of workers
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work. Decodes already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Decode `frame` on the pool.
    ///
    /// Per-frame failures come back as [`RelayError::Decode`]; a closed pool
    /// or a lost worker comes back as [`RelayError::PoolUnavailable`].
    pub async fn decode(&self, frame: Frame) -> Result<Decoded> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RelayError::pool_unavailable("decode pool is closed"))?;

        let decoder = Arc::clone(&self.decoder);
        let sequence = frame.sequence();

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let start = Instant::now();
            let result = decoder.decode(frame.data());
            (result, start.elapsed())
        });

        match handle.await {
            Ok((Ok(image), latency)) => {
                trace!(sequence, ?latency, "Frame decoded");
                Ok(Decoded { sequence, image, latency })
            }
            Ok((Err(e), _)) => Err(RelayError::decode_failed(sequence, e.to_string())),
            Err(e) if e.is_panic() => {
                Err(RelayError::decode_failed(sequence, "decoder panicked"))
            }
            Err(e) => Err(RelayError::pool_unavailable(e.to_string())),
        }
    }
}
