//! Write-serialized handle on a control connection

use crate::{Frame, FrameSink, TransportError, TransportResult};
use publictunnel_proto::{ControlCodec, ControlMessage};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

/// Shared write half of a control connection
///
/// WebSocket sinks do not support concurrent writers, so every frame goes through one
/// mutex. Each write is bounded by `write_timeout`; once a write fails the writer is
/// marked closed, later writes fail fast and [`ControlWriter::closed`] resolves.
pub struct ControlWriter {
    sink: Mutex<Box<dyn FrameSink>>,
    write_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for ControlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlWriter")
            .field("write_timeout", &self.write_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ControlWriter {
    pub fn new<S: FrameSink>(sink: S, write_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            write_timeout,
            closed: watch::channel(false).0,
        }
    }

    /// Encode and send one control message as a text frame
    pub async fn send_message(&self, msg: &ControlMessage) -> TransportResult<()> {
        let text = ControlCodec::encode(msg)?;
        trace!("Sending {} ({} bytes)", msg.message_type(), text.len());
        self.send(Frame::Text(text)).await
    }

    /// Liveness probe
    pub async fn ping(&self) -> TransportResult<()> {
        self.send(Frame::Ping(Vec::new())).await
    }

    /// Answer a liveness probe
    pub async fn pong(&self, data: Vec<u8>) -> TransportResult<()> {
        self.send(Frame::Pong(data)).await
    }

    /// Close the connection; later writes fail with [`TransportError::ConnectionClosed`]
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error while closing control connection: {}", e),
            Err(_) => debug!("Timed out closing control connection"),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the writer is closed, either explicitly or by a failed write
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns once closed
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn send(&self, frame: Frame) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        let result = match tokio::time::timeout(self.write_timeout, sink.send_frame(frame)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        if let Err(e) = &result {
            debug!("Write failed, closing control connection: {}", e);
            self.closed.send_replace(true);
        }
        result
    }
}
