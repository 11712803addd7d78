//! In-memory frame source fed through an mpsc channel.
//!
//! Lets a host feed frames it obtained some other way (a local camera, a
//! file) through the same session machinery, and lets tests script a
//! producer precisely.

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use super::FrameSource;
use crate::{RelayError, Result};

/// Producer half of a [`ChannelSource`].
///
/// Dropping every sender closes the source gracefully.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<std::io::Result<Bytes>>,
}

impl ChannelSender {
    /// Queue one encoded frame. Returns `false` once the session is gone.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(payload.into())).is_ok()
    }

    /// Make the source report a connection fault.
    pub fn fail(&self, error: std::io::Error) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the consuming session has dropped the source
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Frame source backed by an unbounded channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<std::io::Result<Bytes>>,
    peer: SocketAddr,
}

impl ChannelSource {
    /// Create a connected sender/source pair reporting `peer` as its address
    pub fn new(peer: SocketAddr) -> (ChannelSender, ChannelSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSender { tx }, ChannelSource { rx, peer })
    }
}

#[async_trait::async_trait]
impl FrameSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        match self.rx.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(RelayError::connection_failed_with_source(
                self.peer,
                "channel source failed",
                Box::new(e),
            )),
            None => Ok(None),
        }
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaultKind;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 1))
    }

    #[tokio::test]
    async fn yields_frames_then_closes() {
        let (tx, mut source) = ChannelSource::new(peer());
        assert!(tx.send(vec![1u8, 2]));
        drop(tx);

        assert_eq!(source.next_message().await.unwrap().as_deref(), Some(&[1u8, 2][..]));
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_faults_as_connection_errors() {
        let (tx, mut source) = ChannelSource::new(peer());
        tx.fail(std::io::Error::from(std::io::ErrorKind::ConnectionReset));

        let err = source.next_message().await.unwrap_err();
        assert_eq!(err.kind(), FaultKind::Connection);
    }

    #[tokio::test]
    async fn sender_sees_dropped_source() {
        let (tx, source) = ChannelSource::new(peer());
        drop(source);
        assert!(tx.is_closed());
        assert!(!tx.send(vec![0u8]));
    }
}
