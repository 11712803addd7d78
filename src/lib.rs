//! Real-time relay for streamed video frames.
//!
//! Framerelay accepts encoded frames (JPEG, PNG) from producers over
//! WebSocket, decodes them on a bounded worker pool, runs a pluggable
//! processor over each image and hands the result to a render sink, while
//! tracking throughput and decode latency per session.
//!
//! # Features
//!
//! - **Freshness over completeness**: each session buffers at most one frame;
//!   a slow pipeline skips stale frames instead of queueing them
//! - **Isolation**: a corrupt frame, a faulting processor or a broken
//!   connection never takes down more than its own frame or session
//! - **Prompt teardown**: cancelling a session never waits on a decode
//! - **Pluggable stages**: [`Decoder`](decode::Decoder),
//!   [`Processor`](processors::Processor),
//!   [`RenderSink`](render::RenderSink) and
//!   [`FrameSource`](source::FrameSource) are traits
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framerelay::{FrameRelay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> framerelay::Result<()> {
//!     let relay = FrameRelay::start(RelayConfig::default()).await?;
//!     println!("Listening on ws://{}", relay.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     relay.shutdown().await
//! }
//! ```

pub mod config;
pub mod decode;
mod error;
pub mod metrics;
pub mod processors;
pub mod queue;
pub mod render;
pub mod server;
pub mod session;
pub mod source;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Core exports
pub use error::*;
pub use types::{Frame, Image};

// Main API exports
pub use config::RelayConfig;
pub use metrics::{MetricsSnapshot, RelayStatsSnapshot};
pub use server::{RelayHandle, RelayServer};
pub use session::{Session, SessionEnd, SessionHandle, SessionReport, SessionState};

/// Unified entry point for running a relay.
///
/// # Examples
///
/// ```rust,no_run
/// use framerelay::{FrameRelay, RelayConfig};
/// use framerelay::render::WatchSink;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> framerelay::Result<()> {
/// let sink = Arc::new(WatchSink::new());
/// let relay = FrameRelay::builder(RelayConfig::default())
///     .with_sink(sink.clone())
///     .start()
///     .await?;
/// # relay.shutdown().await
/// # }
/// ```
pub struct FrameRelay;

impl FrameRelay {
    /// Start a relay with collaborators built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The `pose` processor is selected (it needs a host-supplied model,
    ///   see [`RelayServer::with_pose_estimator`])
    /// - The listen address cannot be bound
    pub async fn start(config: RelayConfig) -> Result<RelayHandle> {
        RelayServer::builder(config).start().await
    }

    /// Builder for relays with custom collaborators
    pub fn builder(config: RelayConfig) -> RelayServer {
        RelayServer::builder(config)
    }
}
