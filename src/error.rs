//! Error types for the frame relay.
//!
//! Every failure the relay can observe is a [`RelayError`]. Errors are grouped
//! by [`FaultKind`], which decides how far a failure is allowed to travel:
//!
//! - **Transient**: a single bad frame (decode failure, processor fault,
//!   render failure). Logged and counted, the session keeps streaming.
//! - **Connection**: the producer's connection broke. Ends that session only.
//! - **Fatal**: the session cannot continue (decode pool gone, handshake
//!   failed) or the server cannot start (bind, configuration).
//!
//! A peer that closes cleanly is not an error at all; see
//! [`SessionEnd::Graceful`](crate::session::SessionEnd::Graceful).
//!
//! ```rust
//! use framerelay::{FaultKind, RelayError};
//!
//! let error = RelayError::decode_failed(7, "truncated JPEG");
//! assert_eq!(error.kind(), FaultKind::Transient);
//! assert!(!error.is_session_fatal());
//! ```

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Recovered inside the pipeline loop.
    Transient,
    /// Terminates the owning session.
    Connection,
    /// Terminates the owning session, or refuses startup.
    Fatal,
}

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Failed to decode frame {sequence}: {reason}")]
    Decode { sequence: u64, reason: String },

    #[error("Processor '{processor}' faulted: {reason}")]
    Process { processor: String, reason: String },

    #[error("Render sink '{sink}' failed: {reason}")]
    Render { sink: String, reason: String },

    #[error("Connection to {peer} failed: {reason}")]
    Connection {
        peer: SocketAddr,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("WebSocket handshake with {peer} failed")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Decode pool unavailable: {reason}")]
    PoolUnavailable { reason: String },

    #[error("Failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Classify this error.
    pub fn kind(&self) -> FaultKind {
        match self {
            RelayError::Decode { .. } => FaultKind::Transient,
            RelayError::Process { .. } => FaultKind::Transient,
            RelayError::Render { .. } => FaultKind::Transient,
            RelayError::Connection { .. } => FaultKind::Connection,
            RelayError::Io(_) => FaultKind::Connection,
            RelayError::Handshake { .. } => FaultKind::Fatal,
            RelayError::PoolUnavailable { .. } => FaultKind::Fatal,
            RelayError::Bind { .. } => FaultKind::Fatal,
            RelayError::Config { .. } => FaultKind::Fatal,
            RelayError::Task { .. } => FaultKind::Fatal,
        }
    }

    /// Returns whether this error ends the session that observed it.
    pub fn is_session_fatal(&self) -> bool {
        self.kind() != FaultKind::Transient
    }

    /// Helper constructor for per-frame decode failures.
    pub fn decode_failed(sequence: u64, reason: impl Into<String>) -> Self {
        RelayError::Decode { sequence, reason: reason.into() }
    }

    /// Helper constructor for processor faults.
    pub fn process_fault(processor: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::Process { processor: processor.into(), reason: reason.into() }
    }

    /// Helper constructor for render sink failures.
    pub fn render_failed(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::Render { sink: sink.into(), reason: reason.into() }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(peer: SocketAddr, reason: impl Into<String>) -> Self {
        RelayError::Connection { peer, reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        peer: SocketAddr,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RelayError::Connection { peer, reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for decode pool failures.
    pub fn pool_unavailable(reason: impl Into<String>) -> Self {
        RelayError::PoolUnavailable { reason: reason.into() }
    }

    /// Helper constructor for a task that panicked or was aborted.
    pub fn task_failed(task: &'static str, reason: impl Into<String>) -> Self {
        RelayError::Task { task, reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        RelayError::Config { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 6789))
    }

    proptest! {
        #[test]
        fn messages_carry_their_context(
            reason in ".*",
            sequence in any::<u64>(),
            name in "\\w+",
        ) {
            let decode = RelayError::decode_failed(sequence, reason.clone());
            let process = RelayError::process_fault(name.clone(), reason.clone());
            let render = RelayError::render_failed(name.clone(), reason.clone());
            let conn = RelayError::connection_failed(peer(), reason.clone());

            let decode_msg = decode.to_string();
            prop_assert!(decode_msg.contains(&sequence.to_string()));
            prop_assert!(decode_msg.contains(&reason));
            prop_assert!(process.to_string().contains(&name));
            prop_assert!(render.to_string().contains(&name));
            prop_assert!(conn.to_string().contains("127.0.0.1:6789"));
        }

        #[test]
        fn transient_errors_never_end_a_session(sequence in any::<u64>(), reason in ".*") {
            prop_assert!(!RelayError::decode_failed(sequence, reason.clone()).is_session_fatal());
            prop_assert!(!RelayError::process_fault("p", reason.clone()).is_session_fatal());
            prop_assert!(!RelayError::render_failed("s", reason).is_session_fatal());
        }
    }

    #[test]
    fn classification() {
        assert_eq!(RelayError::connection_failed(peer(), "reset").kind(), FaultKind::Connection);
        assert_eq!(RelayError::pool_unavailable("closed").kind(), FaultKind::Fatal);
        assert_eq!(RelayError::invalid_config("zero workers").kind(), FaultKind::Fatal);

        let io: RelayError = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
        assert_eq!(io.kind(), FaultKind::Connection);
        assert!(io.is_session_fatal());
    }

    #[test]
    fn source_chain_is_preserved() {
        let inner = std::io::Error::other("socket gone");
        let error = RelayError::connection_failed_with_source(peer(), "read", Box::new(inner));

        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("socket gone"));
    }

    #[test]
    fn error_is_send_sync_static() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<RelayError>();
    }
}
