//! Sessions: one producer connection and the pipeline that serves it.
//!
//! A session is two tasks joined by a [`FreshnessQueue`]:
//!
//! - the **ingress** task owns the [`FrameSource`] and puts every received
//!   payload into the queue, overwriting anything the pipeline has not yet
//!   picked up;
//! - the **pipeline** task takes the newest frame, decodes it on the shared
//!   [`DecodePool`], runs the processor, hands the result to the render sink
//!   and updates the session's metrics.
//!
//! A third, supervising task waits for whichever of the two ends first, then
//! cancels the session token, closes the queue and waits for the other one.
//! Nothing else is shared between the tasks, and nothing is shared between
//! sessions except the pool, the processor, the sink and [`RelayStats`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use framerelay::decode::{DecodePool, ImageDecoder};
//! use framerelay::processors::Passthrough;
//! use framerelay::render::LogSink;
//! use framerelay::session::{Session, SessionContext};
//! use framerelay::source::ChannelSource;
//!
//! # #[tokio::main]
//! # async fn main() -> framerelay::Result<()> {
//! let pool = DecodePool::new(Arc::new(ImageDecoder), 2)?;
//! let context = SessionContext::new(pool, Arc::new(Passthrough), Arc::new(LogSink));
//!
//! let (tx, source) = ChannelSource::new("127.0.0.1:9000".parse().unwrap());
//! let session = Session::spawn(source, context);
//! tx.send(std::fs::read("frame.png")?);
//! drop(tx);
//!
//! let report = session.join().await;
//! println!("{:?} after {} frames", report.end, report.metrics.frames_rendered);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::decode::DecodePool;
use crate::metrics::{Clock, MetricsCollector, MetricsSnapshot, RelayStats, SystemClock};
use crate::processors::{self, Processor, draw};
use crate::queue::{FreshnessQueue, PutOutcome};
use crate::render::{RenderSink, RenderedFrame};
use crate::source::FrameSource;
use crate::types::Frame;
use crate::RelayError;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The producer closed the connection cleanly
    Graceful,
    /// The session was cancelled from outside
    Cancelled,
    /// A connection fault or a fatal error ended the session
    Fault(RelayError),
}

impl SessionEnd {
    pub fn is_graceful(&self) -> bool {
        matches!(self, SessionEnd::Graceful)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionEnd::Cancelled)
    }

    /// The error that ended the session, if any
    pub fn fault(&self) -> Option<&RelayError> {
        match self {
            SessionEnd::Fault(e) => Some(e),
            _ => None,
        }
    }
}

/// Final account of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: u64,
    pub peer: SocketAddr,
    pub end: SessionEnd,
    pub metrics: MetricsSnapshot,
}

/// Everything a session borrows from the server.
#[derive(Clone)]
pub struct SessionContext {
    pub pool: DecodePool,
    pub processor: Arc<dyn Processor>,
    pub sink: Arc<dyn RenderSink>,
    pub stats: Arc<RelayStats>,
    pub clock: Arc<dyn Clock>,
    pub metrics_window: Duration,
    /// Target rate for the throughput overlay; `None` disables it
    pub overlay_target: Option<f64>,
    /// Parent token; each session runs on a child of it
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("pool", &self.pool)
            .field("processor", &self.processor.name())
            .field("sink", &self.sink.name())
            .field("metrics_window", &self.metrics_window)
            .field("overlay_target", &self.overlay_target)
            .finish()
    }
}

impl SessionContext {
    pub fn new(pool: DecodePool, processor: Arc<dyn Processor>, sink: Arc<dyn RenderSink>) -> Self {
        Self {
            pool,
            processor,
            sink,
            stats: Arc::new(RelayStats::new()),
            clock: Arc::new(SystemClock),
            metrics_window: Duration::from_secs(1),
            overlay_target: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<RelayStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics_window(mut self, window: Duration) -> Self {
        self.metrics_window = window;
        self
    }

    pub fn with_overlay(mut self, target_fps: f64) -> Self {
        self.overlay_target = Some(target_fps);
        self
    }

    pub fn with_parent(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Spawns sessions.
pub struct Session;

impl Session {
    /// Start a session reading from `source`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(source: S, context: SessionContext) -> SessionHandle
    where
        S: FrameSource,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let peer = source.peer();
        let cancel = context.cancel.child_token();
        let queue = Arc::new(FreshnessQueue::new());
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (metrics_tx, metrics_rx) = watch::channel(MetricsSnapshot::default());
        let stats = Arc::clone(&context.stats);

        stats.session_opened();
        info!(session = id, peer = %peer, "Session opened");

        let ingress = tokio::spawn(run_ingress(
            id,
            source,
            Arc::clone(&queue),
            Arc::clone(&stats),
            cancel.clone(),
        ));
        let pipeline =
            tokio::spawn(run_pipeline(id, Arc::clone(&queue), context, metrics_tx, cancel.clone()));
        state_tx.send_replace(SessionState::Streaming);

        let supervisor = tokio::spawn(supervise(Supervised {
            id,
            peer,
            ingress,
            pipeline,
            queue: Arc::clone(&queue),
            state: state_tx,
            stats,
            cancel: cancel.clone(),
        }));

        SessionHandle {
            id,
            peer,
            state: state_rx,
            metrics: metrics_rx,
            queue,
            cancel,
            supervisor: Some(supervisor),
        }
    }
}

/// Owner's view of a running session.
///
/// Dropping the handle cancels the session.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    peer: SocketAddr,
    state: watch::Receiver<SessionState>,
    metrics: watch::Receiver<MetricsSnapshot>,
    queue: Arc<FreshnessQueue>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<SessionEnd>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Latest published metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        *self.metrics.borrow()
    }

    /// Receiver that observes every metrics update
    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics.clone()
    }

    /// Receiver that observes state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// The session's hand-off queue
    pub fn queue(&self) -> &Arc<FreshnessQueue> {
        &self.queue
    }

    /// Request teardown. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the session to close.
    pub async fn join(mut self) -> SessionReport {
        let end = match self.supervisor.take() {
            Some(handle) => match handle.await {
                Ok(end) => end,
                Err(e) => SessionEnd::Fault(join_failure("supervisor", e)),
            },
            None => SessionEnd::Cancelled,
        };
        SessionReport { id: self.id, peer: self.peer, end, metrics: *self.metrics.borrow() }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn join_failure(task: &'static str, error: JoinError) -> RelayError {
    if error.is_panic() {
        RelayError::task_failed(task, "panicked")
    } else {
        RelayError::task_failed(task, error.to_string())
    }
}

async fn run_ingress<S>(
    id: u64,
    mut source: S,
    queue: Arc<FreshnessQueue>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> SessionEnd
where
    S: FrameSource,
{
    let mut sequence = 0u64;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            message = source.next_message() => message,
        };

        match message {
            Ok(Some(payload)) => {
                sequence += 1;
                stats.frame_received();
                match queue.put(Frame::new(payload, sequence)) {
                    PutOutcome::Stored => trace!(session = id, sequence, "Frame queued"),
                    PutOutcome::Replaced { dropped } => {
                        stats.frame_dropped();
                        trace!(session = id, sequence, dropped, "Stale frame replaced");
                    }
                    PutOutcome::Closed => return SessionEnd::Cancelled,
                }
            }
            Ok(None) => return SessionEnd::Graceful,
            Err(e) => return SessionEnd::Fault(e),
        }
    }
}

async fn run_pipeline(
    id: u64,
    queue: Arc<FreshnessQueue>,
    context: SessionContext,
    metrics_tx: watch::Sender<MetricsSnapshot>,
    cancel: CancellationToken,
) -> SessionEnd {
    let mut metrics = MetricsCollector::with_clock(context.metrics_window, Arc::clone(&context.clock));

    let end = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            frame = queue.take() => match frame {
                Some(frame) => frame,
                None => break SessionEnd::Cancelled,
            },
        };
        let sequence = frame.sequence();
        let received_at = frame.received_at();

        // Dropping the decode future abandons the result; the blocking
        // decode still runs to completion and returns its permit.
        let decoded = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session = id, sequence, "Abandoning in-flight decode");
                break SessionEnd::Cancelled;
            }
            result = context.pool.decode(frame) => result,
        };

        match decoded {
            Ok(decoded) => {
                let (mut image, annotated) =
                    match processors::run_guarded(context.processor.as_ref(), &decoded.image) {
                        Ok(processed) => (processed, true),
                        Err(error) => {
                            warn!(session = id, sequence, %error, "Processor fault, rendering plain frame");
                            metrics.record_process_fault();
                            (decoded.image, false)
                        }
                    };

                if let Some(target) = context.overlay_target {
                    draw::throughput_bar(&mut image, metrics.fps(), target);
                }

                let frame = RenderedFrame { session: id, sequence, image, annotated, received_at };
                match context.sink.render(frame) {
                    Ok(()) => {
                        context.stats.frame_rendered();
                        if metrics.record_render(decoded.latency) {
                            debug!(session = id, fps = metrics.fps(), "Throughput window closed");
                        }
                    }
                    Err(e) => {
                        let error = RelayError::render_failed(context.sink.name(), e.to_string());
                        warn!(session = id, sequence, %error, "Render failed");
                        metrics.record_render_failure();
                    }
                }
            }
            Err(error) if !error.is_session_fatal() => {
                warn!(session = id, sequence, %error, "Skipping undecodable frame");
                metrics.record_decode_failure();
                context.stats.decode_failed();
            }
            Err(error) => break SessionEnd::Fault(error),
        }

        metrics.set_dropped(queue.dropped());
        metrics_tx.send_replace(metrics.snapshot());
    };

    metrics.set_dropped(queue.dropped());
    metrics_tx.send_replace(metrics.snapshot());
    end
}

struct Supervised {
    id: u64,
    peer: SocketAddr,
    ingress: JoinHandle<SessionEnd>,
    pipeline: JoinHandle<SessionEnd>,
    queue: Arc<FreshnessQueue>,
    state: watch::Sender<SessionState>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
}

async fn supervise(task: Supervised) -> SessionEnd {
    let Supervised { id, peer, mut ingress, mut pipeline, queue, state, stats, cancel } = task;

    let (first, ingress_done) = tokio::select! {
        result = &mut ingress => (flatten("ingress", result), true),
        result = &mut pipeline => (flatten("pipeline", result), false),
    };

    state.send_replace(SessionState::Closing);
    cancel.cancel();
    queue.close();

    let second =
        if ingress_done { flatten("pipeline", pipeline.await) } else { flatten("ingress", ingress.await) };

    // An explicit cancel loses to whatever the other task saw.
    let end = match (first, second) {
        (SessionEnd::Cancelled, other) => other,
        (first, _) => first,
    };

    match &end {
        SessionEnd::Graceful => info!(session = id, peer = %peer, "Producer closed the session"),
        SessionEnd::Cancelled => info!(session = id, peer = %peer, "Session cancelled"),
        SessionEnd::Fault(error) => error!(session = id, peer = %peer, %error, "Session failed"),
    }

    state.send_replace(SessionState::Closed);
    stats.session_closed();
    end
}

fn flatten(task: &'static str, result: Result<SessionEnd, JoinError>) -> SessionEnd {
    result.unwrap_or_else(|e| SessionEnd::Fault(join_failure(task, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoder, ImageDecoder};
    use crate::metrics::ManualClock;
    use crate::processors::{Passthrough, ProcessError};
    use crate::source::ChannelSource;
    use crate::test_utils::{
        GatedDecoder, RecordingSink, init_tracing, png_bytes, test_peer, wait_until,
    };
    use crate::types::Image;
    use crate::FaultKind;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn context(decoder: Arc<dyn Decoder>, sink: Arc<RecordingSink>) -> SessionContext {
        init_tracing();
        let pool = DecodePool::new(decoder, 1).unwrap();
        SessionContext::new(pool, Arc::new(Passthrough), sink)
    }

    async fn join(handle: SessionHandle) -> SessionReport {
        tokio::time::timeout(TIMEOUT, handle.join()).await.expect("session did not finish")
    }

    #[tokio::test]
    async fn only_the_freshest_frame_is_rendered() {
        let gate = GatedDecoder::new();
        let sink = RecordingSink::new();
        let (tx, source) = ChannelSource::new(test_peer());
        let handle = Session::spawn(source, context(gate.clone(), sink.clone()));

        // First frame is taken and held inside the decoder.
        tx.send(png_bytes(4, 4));
        wait_until(|| gate.started() == 1).await;

        for _ in 0..3 {
            tx.send(png_bytes(4, 4));
        }
        let queue = Arc::clone(handle.queue());
        wait_until(|| queue.dropped() == 2).await;
        gate.open();

        let mut metrics = handle.watch_metrics();
        tokio::time::timeout(TIMEOUT, metrics.wait_for(|m| m.frames_rendered == 2))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sink.sequences(), vec![1, 4]);
        assert_eq!(handle.metrics().frames_dropped, 2);
        assert_eq!(handle.state(), SessionState::Streaming);

        drop(tx);
        let report = join(handle).await;
        assert!(report.end.is_graceful());
        assert_eq!(report.metrics.frames_rendered, 2);
    }

    #[tokio::test]
    async fn corrupt_frame_is_skipped() {
        let sink = RecordingSink::new();
        let (tx, source) = ChannelSource::new(test_peer());
        let ctx = context(Arc::new(ImageDecoder), sink.clone());
        let stats = Arc::clone(&ctx.stats);
        let handle = Session::spawn(source, ctx);
        let mut metrics = handle.watch_metrics();

        tx.send(png_bytes(4, 4));
        metrics.wait_for(|m| m.frames_rendered == 1).await.unwrap();
        tx.send(&b"definitely not an image"[..]);
        metrics.wait_for(|m| m.decode_failures == 1).await.unwrap();
        tx.send(png_bytes(4, 4));
        metrics.wait_for(|m| m.frames_rendered == 2).await.unwrap();

        assert_eq!(sink.sequences(), vec![1, 3]);
        assert_eq!(handle.state(), SessionState::Streaming);
        assert!(!handle.is_finished());
        assert_eq!(stats.snapshot().decode_failures, 1);

        drop(tx);
        let report = join(handle).await;
        assert!(report.end.is_graceful());
        assert_eq!(report.metrics.decode_failures, 1);
        assert_eq!(stats.snapshot().sessions_active, 0);
    }

    #[tokio::test]
    async fn cancel_during_decode_tears_down() {
        let gate = GatedDecoder::new();
        let sink = RecordingSink::new();
        let (tx, source) = ChannelSource::new(test_peer());
        let ctx = context(gate.clone(), sink.clone());
        let pool = ctx.pool.clone();
        let handle = Session::spawn(source, ctx);
        let queue = Arc::clone(handle.queue());
        let mut state = handle.watch_state();

        tx.send(png_bytes(4, 4));
        wait_until(|| gate.started() == 1).await;
        assert_eq!(pool.available(), 0);

        handle.cancel();
        handle.cancel();
        tokio::time::timeout(TIMEOUT, state.wait_for(|s| *s == SessionState::Closed))
            .await
            .unwrap()
            .unwrap();

        let report = join(handle).await;
        assert!(report.end.is_cancelled());
        assert!(queue.is_closed());
        assert_eq!(queue.put(Frame::new(vec![1u8], 99)), PutOutcome::Closed);
        assert!(queue.take().await.is_none());
        assert!(tx.is_closed());

        // The abandoned decode finishes on its own and returns its permit.
        gate.open();
        wait_until(|| pool.available() == 1).await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn connection_fault_ends_the_session() {
        let (tx, source) = ChannelSource::new(test_peer());
        let handle = Session::spawn(source, context(Arc::new(ImageDecoder), RecordingSink::new()));

        tx.fail(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        let report = join(handle).await;

        let error = report.end.fault().expect("fault");
        assert_eq!(error.kind(), FaultKind::Connection);
        assert_eq!(report.peer, test_peer());
    }

    #[tokio::test]
    async fn closed_pool_is_fatal_for_the_session() {
        let (tx, source) = ChannelSource::new(test_peer());
        let ctx = context(Arc::new(ImageDecoder), RecordingSink::new());
        ctx.pool.close();
        let handle = Session::spawn(source, ctx);

        tx.send(png_bytes(4, 4));
        let report = join(handle).await;

        assert!(matches!(report.end.fault(), Some(RelayError::PoolUnavailable { .. })));
    }

    struct Faulty;

    impl Processor for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn process(&self, image: &Image) -> Result<Image, ProcessError> {
            if image.width() > 4 {
                panic!("too wide");
            }
            Err(ProcessError::new("no features today"))
        }
    }

    #[tokio::test]
    async fn processor_faults_render_the_plain_frame() {
        let sink = RecordingSink::new();
        let (tx, source) = ChannelSource::new(test_peer());
        let mut ctx = context(Arc::new(ImageDecoder), sink.clone());
        ctx.processor = Arc::new(Faulty);
        let handle = Session::spawn(source, ctx);
        let mut metrics = handle.watch_metrics();

        tx.send(png_bytes(4, 4));
        metrics.wait_for(|m| m.frames_rendered == 1).await.unwrap();
        tx.send(png_bytes(8, 8));
        metrics.wait_for(|m| m.frames_rendered == 2).await.unwrap();

        let frames = sink.frames();
        assert!(frames.iter().all(|f| !f.annotated));
        assert_eq!(handle.metrics().process_faults, 2);
        assert_eq!(handle.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn render_failures_are_counted() {
        let sink = RecordingSink::new();
        sink.set_failing(true);
        let (tx, source) = ChannelSource::new(test_peer());
        let handle = Session::spawn(source, context(Arc::new(ImageDecoder), sink.clone()));
        let mut metrics = handle.watch_metrics();

        tx.send(png_bytes(4, 4));
        metrics.wait_for(|m| m.render_failures == 1).await.unwrap();
        sink.set_failing(false);
        tx.send(png_bytes(4, 4));
        metrics.wait_for(|m| m.frames_rendered == 1).await.unwrap();

        assert_eq!(sink.sequences(), vec![2]);
    }

    #[tokio::test]
    async fn throughput_comes_from_the_session_clock() {
        let clock = ManualClock::new();
        let (tx, source) = ChannelSource::new(test_peer());
        let ctx = context(Arc::new(ImageDecoder), RecordingSink::new())
            .with_clock(Arc::new(clock.clone()))
            .with_metrics_window(Duration::from_secs(1))
            .with_overlay(30.0);
        let handle = Session::spawn(source, ctx);
        let mut metrics = handle.watch_metrics();

        for n in 1..=3 {
            tx.send(png_bytes(200, 40));
            metrics.wait_for(|m| m.frames_rendered == n).await.unwrap();
        }
        clock.advance(Duration::from_secs(2));
        tx.send(png_bytes(200, 40));
        let snapshot = *metrics.wait_for(|m| m.frames_rendered == 4).await.unwrap();

        assert!((snapshot.fps - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_the_session() {
        let parent = CancellationToken::new();
        let (_tx, source) = ChannelSource::new(test_peer());
        let ctx = context(Arc::new(ImageDecoder), RecordingSink::new()).with_parent(parent.clone());
        let stats = Arc::clone(&ctx.stats);
        let handle = Session::spawn(source, ctx);
        assert_eq!(stats.snapshot().sessions_active, 1);

        parent.cancel();
        let report = join(handle).await;

        assert!(report.end.is_cancelled());
        assert_eq!(stats.snapshot().sessions_active, 0);
        assert_eq!(stats.snapshot().sessions_accepted, 1);
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids() {
        let (_a_tx, a) = ChannelSource::new(test_peer());
        let (_b_tx, b) = ChannelSource::new(test_peer());
        let ctx = context(Arc::new(ImageDecoder), RecordingSink::new());

        let first = Session::spawn(a, ctx.clone());
        let second = Session::spawn(b, ctx);
        assert_ne!(first.id(), second.id());
    }
}
