//! WebSocket client transport (tokio-tungstenite)

use crate::{Frame, FrameSink, FrameStream, TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a client WebSocket
pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

/// Read half of a client WebSocket
pub struct WebSocketFrames {
    inner: SplitStream<WsStream>,
}

/// Dial a `ws://` or `wss://` URL and split the socket
pub async fn connect(url: &str) -> TransportResult<(WebSocketSink, WebSocketFrames)> {
    debug!("Dialing {}", url);
    let (ws_stream, response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectionError(format!("dial {}: {}", url, e)))?;
    trace!("WebSocket handshake completed: {}", response.status());

    let (sink, stream) = ws_stream.split();
    Ok((WebSocketSink { inner: sink }, WebSocketFrames { inner: stream }))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Frame) -> TransportResult<()> {
        self.inner
            .send(to_message(frame))
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
impl FrameStream for WebSocketFrames {
    async fn recv_frame(&mut self) -> TransportResult<Option<Frame>> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            };

            return Ok(Some(match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(data) => Frame::Binary(data),
                Message::Ping(data) => Frame::Ping(data),
                Message::Pong(data) => Frame::Pong(data),
                Message::Close(_) => return Ok(None),
                // Raw frames are only produced when writing
                Message::Frame(_) => continue,
            }));
        }
    }
}
