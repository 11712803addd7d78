//! WebSocket listener and session registry.
//!
//! [`RelayServer`] binds the listen address, accepts connections, performs the
//! WebSocket handshake and spawns one [`Session`] per producer. Sessions run
//! independently on child tokens of the server's token; one failing never
//! affects the listener or its siblings.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RelayConfig, SinkConfig};
use crate::decode::{DecodePool, Decoder, ImageDecoder};
use crate::metrics::{Clock, RelayStats, RelayStatsSnapshot, SystemClock};
use crate::processors::{self, PoseEstimator, Processor};
use crate::render::{LogSink, RenderSink, SnapshotSink};
use crate::session::{Session, SessionContext, SessionReport};
use crate::source::WebSocketSource;
use crate::{RelayError, Result};

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Builder for a relay server.
///
/// Collaborators not supplied explicitly are built from the configuration.
pub struct RelayServer {
    config: RelayConfig,
    decoder: Arc<dyn Decoder>,
    processor: Option<Arc<dyn Processor>>,
    pose: Option<Arc<dyn PoseEstimator>>,
    sink: Option<Arc<dyn RenderSink>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("decoder", &self.decoder.name())
            .field("processor", &self.processor.as_ref().map(|p| p.name()))
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl RelayServer {
    pub fn builder(config: RelayConfig) -> Self {
        Self {
            config,
            decoder: Arc::new(ImageDecoder),
            processor: None,
            pose: None,
            sink: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Use `processor` instead of the one the configuration selects
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Model backing the `pose` processor kind
    pub fn with_pose_estimator(mut self, estimator: Arc<dyn PoseEstimator>) -> Self {
        self.pose = Some(estimator);
        self
    }

    /// Use `sink` instead of the one the configuration selects
    pub fn with_sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bind the listener and start accepting producers.
    ///
    /// Fails without side effects on invalid configuration; fails with
    /// [`RelayError::Bind`] when the address is unavailable.
    pub async fn start(self) -> Result<RelayHandle> {
        let config = self.config;
        config.validate()?;

        let processor = match self.processor {
            Some(processor) => processor,
            None => processors::build(&config.processor, self.pose)?,
        };
        let sink = match self.sink {
            Some(sink) => sink,
            None => build_sink(&config.sink)?,
        };
        let pool = DecodePool::new(self.decoder, config.decode_workers)?;

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind { addr: config.listen, source })?;
        let local_addr = listener.local_addr()?;

        let stats = Arc::new(RelayStats::new());
        let cancel = CancellationToken::new();

        let mut context = SessionContext::new(pool, processor, sink)
            .with_stats(Arc::clone(&stats))
            .with_clock(self.clock)
            .with_metrics_window(config.metrics_window())
            .with_parent(cancel.clone());
        if config.overlay_metrics {
            context = context.with_overlay(config.target_fps);
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        info!(
            addr = %local_addr,
            workers = config.decode_workers,
            processor = context.processor.name(),
            sink = context.sink.name(),
            "Relay listening"
        );

        let task = tokio::spawn(accept_loop(listener, context, ws_config));

        Ok(RelayHandle { local_addr, stats, cancel, task: Some(task) })
    }
}

fn build_sink(config: &SinkConfig) -> Result<Arc<dyn RenderSink>> {
    let sink: Arc<dyn RenderSink> = match config {
        SinkConfig::Log => Arc::new(LogSink),
        SinkConfig::Snapshot { path } => Arc::new(
            SnapshotSink::new(path)
                .map_err(|e| RelayError::invalid_config(format!("snapshot sink: {}", e)))?,
        ),
    };
    Ok(sink)
}

async fn accept_loop(listener: TcpListener, context: SessionContext, ws_config: WebSocketConfig) {
    let cancel = context.cancel.clone();
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Connection accepted");
                    sessions.spawn(serve_connection(stream, peer, context.clone(), ws_config.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                reap(joined);
            }
        }
    }

    drop(listener);
    info!(active = sessions.len(), "Listener stopped, draining sessions");
    while let Some(joined) = sessions.join_next().await {
        reap(joined);
    }
    context.pool.close();
    info!("Relay stopped");
}

fn reap(joined: std::result::Result<Option<SessionReport>, tokio::task::JoinError>) {
    match joined {
        Ok(Some(report)) => debug!(
            session = report.id,
            peer = %report.peer,
            rendered = report.metrics.frames_rendered,
            dropped = report.metrics.frames_dropped,
            "Session reaped"
        ),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Connection task failed"),
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: SessionContext,
    ws_config: WebSocketConfig,
) -> Option<SessionReport> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Could not disable Nagle");
    }

    let handshake = tokio::select! {
        _ = context.cancel.cancelled() => return None,
        result = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)) => result,
    };
    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            let error = RelayError::Handshake { peer, source: Box::new(e) };
            warn!(peer = %peer, %error, "Rejected connection");
            return None;
        }
    };

    let session = Session::spawn(WebSocketSource::new(ws, peer), context);
    Some(session.join().await)
}

/// Handle to a running relay.
///
/// Dropping the handle stops the relay without waiting for it.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Aggregate counters across all sessions
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting, cancel every session and wait for them to close
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Relay shutdown requested");
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the relay to stop on its own (after a shutdown elsewhere)
    pub async fn wait(mut self) -> Result<()> {
        self.join().await
    }

    /// Token that stops the relay when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| RelayError::task_failed("listener", e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
