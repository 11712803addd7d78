//! WebSocket frame source: one binary message per encoded frame

use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use super::FrameSource;
use crate::{RelayError, Result};

/// Reads frames from an accepted WebSocket connection.
///
/// Text, ping and pong messages are skipped; ping replies are queued by the
/// WebSocket layer itself.
pub struct WebSocketSource<S> {
    stream: WebSocketStream<S>,
    peer: SocketAddr,
}

impl<S> WebSocketSource<S> {
    pub fn new(stream: WebSocketStream<S>, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

#[async_trait::async_trait]
impl<S> FrameSource for WebSocketSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                None => {
                    debug!(peer = %self.peer, "WebSocket stream ended");
                    return Ok(None);
                }
                Some(Ok(Message::Binary(payload))) => return Ok(Some(payload)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(peer = %self.peer, ?frame, "Peer closed WebSocket");
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    trace!(peer = %self.peer, len = other.len(), "Skipping non-binary message");
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(RelayError::connection_failed_with_source(
                        self.peer,
                        "WebSocket read failed",
                        Box::new(e),
                    ));
                }
            }
        }
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}
