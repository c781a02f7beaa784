//! In-process control connection
//!
//! Two unbounded channels wired back to back. Dropping or closing one side makes the
//! other side's reads return `None` and its writes fail, which is how tests simulate a
//! lost connection.

use crate::{Frame, FrameSink, FrameStream, TransportError, TransportResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Write half of an in-memory connection
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

/// Read half of an in-memory connection
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// One end of an in-memory connection
#[derive(Debug)]
pub struct MemoryTransport {
    pub sink: MemorySink,
    pub stream: MemoryStream,
}

impl MemoryTransport {
    pub fn split(self) -> (MemorySink, MemoryStream) {
        (self.sink, self.stream)
    }
}

/// Create a connected pair of endpoints
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        MemoryTransport {
            sink: MemorySink { tx: Some(a_tx) },
            stream: MemoryStream { rx: b_rx },
        },
        MemoryTransport {
            sink: MemorySink { tx: Some(b_tx) },
            stream: MemoryStream { rx: a_rx },
        },
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Close);
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv_frame(&mut self) -> TransportResult<Option<Frame>> {
        match self.rx.recv().await {
            Some(Frame::Close) | None => Ok(None),
            Some(frame) => Ok(Some(frame)),
        }
    }
}
