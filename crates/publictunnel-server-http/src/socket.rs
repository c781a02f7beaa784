//! Adapts an upgraded axum WebSocket to the transport traits

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use publictunnel_transport::{Frame, FrameSink, FrameStream, TransportError, TransportResult};

/// Write half of an upgraded socket
pub struct AxumSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Read half of an upgraded socket
pub struct AxumSocketStream {
    inner: SplitStream<WebSocket>,
}

pub fn split(socket: WebSocket) -> (AxumSocketSink, AxumSocketStream) {
    let (sink, stream) = socket.split();
    (AxumSocketSink { inner: sink }, AxumSocketStream { inner: stream })
}

#[async_trait]
impl FrameSink for AxumSocketSink {
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

#[async_trait]
impl FrameStream for AxumSocketStream {
    async fn recv_frame(&mut self) -> TransportResult<Option<Frame>> {
        let message = match self.inner.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            None => return Ok(None),
        };

        Ok(match message {
            Message::Text(text) => Some(Frame::Text(text.to_string())),
            Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
            Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
            Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
            Message::Close(_) => None,
        })
    }
}
