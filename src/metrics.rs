//! Throughput and latency metrics.
//!
//! [`MetricsCollector`] is owned by a single pipeline task and needs no
//! locking. It turns "frame rendered" events into a windowed frames-per-second
//! estimate that keeps its last value between windows, so an overlay never
//! flickers to zero. [`RelayStats`] is the server-wide aggregate shared by all
//! sessions and is updated with atomics.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset_us: Arc::new(AtomicU64::new(0)) }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.offset_us.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_micros(self.offset_us.load(Ordering::SeqCst))
    }
}

/// Point-in-time view of one session's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Throughput computed at the end of the last complete window
    pub fps: f64,
    /// Frames rendered since the session started
    pub frames_rendered: u64,
    /// Frames discarded by the freshness queue
    pub frames_dropped: u64,
    /// Frames whose payload could not be decoded
    pub decode_failures: u64,
    /// Frames rendered without annotation because the processor faulted
    pub process_faults: u64,
    /// Frames the render sink rejected
    pub render_failures: u64,
    /// Decode time of the most recent rendered frame
    pub last_decode_latency: Duration,
}

/// Windowed frame-rate and latency tracker.
pub struct MetricsCollector {
    clock: Arc<dyn Clock>,
    window: Duration,
    window_start: Instant,
    frames_in_window: u64,
    snapshot: MetricsSnapshot,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("window", &self.window)
            .field("frames_in_window", &self.frames_in_window)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl MetricsCollector {
    /// Collector on the system clock
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Collector on a caller-supplied clock
    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window_start = clock.now();
        Self { clock, window, window_start, frames_in_window: 0, snapshot: MetricsSnapshot::default() }
    }

    /// Record one rendered frame.
    ///
    /// Returns `true` when this call closed a window and the throughput
    /// estimate changed.
    pub fn record_render(&mut self, decode_latency: Duration) -> bool {
        self.frames_in_window += 1;
        self.snapshot.frames_rendered += 1;
        self.snapshot.last_decode_latency = decode_latency;
        self.roll_window()
    }

    /// Close the current window if it has elapsed.
    pub fn roll_window(&mut self) -> bool {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return false;
        }

        self.snapshot.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = now;
        true
    }

    pub fn record_decode_failure(&mut self) {
        self.snapshot.decode_failures += 1;
    }

    pub fn record_process_fault(&mut self) {
        self.snapshot.process_faults += 1;
    }

    pub fn record_render_failure(&mut self) {
        self.snapshot.render_failures += 1;
    }

    /// Mirror the queue's drop counter into the snapshot
    pub fn set_dropped(&mut self, dropped: u64) {
        self.snapshot.frames_dropped = dropped;
    }

    /// Current throughput estimate
    pub fn fps(&self) -> f64 {
        self.snapshot.fps
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot
    }
}

/// Server-wide counters shared by every session.
#[derive(Debug, Default)]
pub struct RelayStats {
    sessions_accepted: AtomicU64,
    sessions_active: AtomicU64,
    frames_received: AtomicU64,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    decode_failures: AtomicU64,
}

/// Plain copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub sessions_accepted: u64,
    pub sessions_active: u64,
    pub frames_received: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_opened(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}
