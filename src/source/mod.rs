//! Frame sources: where a session's encoded frames come from.
//!
//! A source yields one encoded frame per message. Transport framing is the
//! source's business; the session only sees whole payloads.

use bytes::Bytes;
use std::net::SocketAddr;

use crate::Result;

pub mod channel;
pub mod websocket;

pub use channel::{ChannelSender, ChannelSource};
pub use websocket::WebSocketSource;

/// Trait for producer connections
///
/// Implementations own the connection. Dropping the source releases it.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next encoded frame
    ///
    /// Returns:
    /// - `Ok(Some(payload))` - One encoded frame
    /// - `Ok(None)` - Peer closed the connection cleanly
    /// - `Err(e)` - Connection fault; the session must end
    async fn next_message(&mut self) -> Result<Option<Bytes>>;

    /// Remote address of the producer
    fn peer(&self) -> SocketAddr;
}
