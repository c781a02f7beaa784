//! Transport abstraction for the control channel
//!
//! The relay sessions on both ends talk to the peer through two small traits:
//! [`FrameSink`] for the write half and [`FrameStream`] for the read half. The server
//! implements them over an upgraded axum socket, the client over `tokio-tungstenite`,
//! and tests over the in-process [`memory`] pair.
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  server relay session        │      │  client relay session        │
//! │  (publictunnel-control)      │      │  (publictunnel-client)       │
//! └──────────────┬───────────────┘      └──────────────┬───────────────┘
//!                │ ControlWriter / FrameStream          │
//!                ↓                                      ↓
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  axum WebSocket halves       │ <==> │  tokio-tungstenite halves    │
//! └──────────────────────────────┘      └──────────────────────────────┘
//! ```

pub mod memory;
pub mod websocket;
pub mod writer;

pub use writer::ControlWriter;

use async_trait::async_trait;
use publictunnel_proto::CodecError;
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// One message on the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Graceful close. Never returned by [`FrameStream::recv_frame`], which yields `None` instead.
    Close,
}

/// Write half of a control connection
///
/// Implementations are not required to tolerate concurrent writers; wrap them in a
/// [`ControlWriter`] to share.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<()>;

    /// Send a close frame (best effort) and stop accepting writes
    async fn close(&mut self) -> TransportResult<()>;
}

/// Read half of a control connection
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Receive the next frame
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv_frame(&mut self) -> TransportResult<Option<Frame>>;
}

#[async_trait]
impl FrameSink for Box<dyn FrameSink> {
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<()> {
        (**self).send_frame(frame).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        (**self).close().await
    }
}

#[async_trait]
impl FrameStream for Box<dyn FrameStream> {
    async fn recv_frame(&mut self) -> TransportResult<Option<Frame>> {
        (**self).recv_frame().await
    }
}
