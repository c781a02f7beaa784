//! Server side of a control connection

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use publictunnel_proto::{
    CodecError, ControlCodec, ControlMessage, RegisterAckPayload, RegisterPayload, PING_PERIOD,
    PONG_WAIT, WRITE_WAIT,
};
use publictunnel_router::RegistryError;
use publictunnel_transport::{ControlWriter, Frame, FrameSink, FrameStream, TransportError};

use crate::connection::{TunnelConnection, TunnelRegistry};
use crate::pending_requests::PendingRequests;

/// Liveness timing for a control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time allowed between inbound frames
    pub pong_wait: Duration,
    /// Interval between pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Time allowed for one write
    pub write_wait: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            write_wait: WRITE_WAIT,
        }
    }
}

/// Why a control session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Registration rejected: {0}")]
    Registration(#[from] RegistryError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No frame received for {0:?}")]
    ReadTimeout(Duration),

    #[error("Heartbeat failed")]
    HeartbeatFailed,
}

/// Handles control connections from tunnel clients
#[derive(Clone)]
pub struct TunnelHandler {
    registry: TunnelRegistry,
    pending_requests: PendingRequests,
    tunnel_domain: String,
    heartbeat: HeartbeatConfig,
}

impl TunnelHandler {
    pub fn new(
        registry: TunnelRegistry,
        pending_requests: PendingRequests,
        tunnel_domain: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            pending_requests,
            tunnel_domain: tunnel_domain.into(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Public URL of a tunnel
    pub fn public_url(&self, scheme: &str, subdomain: &str) -> String {
        format!("{}://{}.{}", scheme, subdomain, self.tunnel_domain)
    }

    /// Run one control connection to completion
    ///
    /// `scheme` is the scheme advertised in the public URL. Returns once the connection
    /// is gone and its subdomain has been released.
    pub async fn handle_connection<S, R>(
        &self,
        sink: S,
        mut stream: R,
        scheme: &str,
    ) -> Result<(), SessionError>
    where
        S: FrameSink,
        R: FrameStream,
    {
        let writer = Arc::new(ControlWriter::new(sink, self.heartbeat.write_wait));

        let register = match self.read_registration(&mut stream, &writer).await {
            Ok(register) => register,
            Err(e) => {
                warn!("Dropping control connection before registration: {}", e);
                writer.close().await;
                return Err(e);
            }
        };

        let connection = Arc::new(TunnelConnection::new(writer.clone()));
        let subdomain = match self
            .registry
            .register(&register.subdomain, connection.clone())
            .await
        {
            Ok(subdomain) => subdomain,
            Err(e) => {
                warn!("Rejecting registration for '{}': {}", register.subdomain, e);
                let ack = ControlMessage::RegisterAck(RegisterAckPayload::rejected(e.to_string()));
                if let Err(send_err) = writer.send_message(&ack).await {
                    debug!("Failed to send rejection: {}", send_err);
                }
                writer.close().await;
                return Err(e.into());
            }
        };

        if !register.subdomain.is_empty() && !register.subdomain.eq_ignore_ascii_case(&subdomain) {
            info!(
                "Requested subdomain '{}' was taken, assigned '{}'",
                register.subdomain, subdomain
            );
        }

        let url = self.public_url(scheme, &subdomain);
        let ack = ControlMessage::RegisterAck(RegisterAckPayload::assigned(&subdomain, &url));
        let result = match writer.send_message(&ack).await {
            Ok(()) => {
                info!(
                    "Tunnel {} registered: {} (connection {})",
                    subdomain,
                    url,
                    connection.id()
                );
                self.run_session(&subdomain, &mut stream, &writer).await
            }
            Err(e) => Err(e.into()),
        };

        self.registry
            .remove_if_current(&subdomain, &connection)
            .await;
        writer.close().await;

        match &result {
            Ok(()) => info!("Tunnel {} disconnected", subdomain),
            Err(e) => info!("Tunnel {} disconnected: {}", subdomain, e),
        }
        result
    }

    /// Wait for the first message, which must be a registration
    async fn read_registration<R: FrameStream>(
        &self,
        stream: &mut R,
        writer: &ControlWriter,
    ) -> Result<RegisterPayload, SessionError> {
        let pong_wait = self.heartbeat.pong_wait;
        let message = tokio::time::timeout(pong_wait, read_message(stream, writer))
            .await
            .map_err(|_| SessionError::ReadTimeout(pong_wait))??;

        match message {
            Some(ControlMessage::Register(register)) => Ok(register),
            Some(other) => Err(SessionError::Handshake(format!(
                "expected REGISTER, got {}",
                other.message_type()
            ))),
            None => Err(SessionError::Handshake(
                "connection closed before registration".to_string(),
            )),
        }
    }

    /// Heartbeat plus read loop for a registered tunnel
    async fn run_session<R: FrameStream>(
        &self,
        subdomain: &str,
        stream: &mut R,
        writer: &Arc<ControlWriter>,
    ) -> Result<(), SessionError> {
        let mut heartbeat = tokio::spawn(heartbeat(
            writer.clone(),
            self.heartbeat.ping_period,
            subdomain.to_string(),
        ));

        let pong_wait = self.heartbeat.pong_wait;
        let result = loop {
            let frame = tokio::select! {
                biased;
                _ = &mut heartbeat => break Err(SessionError::HeartbeatFailed),
                // A request write from the ingress failed
                _ = writer.closed() => {
                    break Err(SessionError::Transport(TransportError::ConnectionClosed))
                }
                read = tokio::time::timeout(pong_wait, stream.recv_frame()) => match read {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => break Ok(()),
                    Ok(Err(e)) => break Err(SessionError::Transport(e)),
                    Err(_) => {
                        warn!("Tunnel {} sent nothing for {:?}", subdomain, pong_wait);
                        break Err(SessionError::ReadTimeout(pong_wait));
                    }
                },
            };

            let data = match frame {
                Frame::Text(text) => text.into_bytes(),
                Frame::Binary(data) => data,
                Frame::Ping(data) => {
                    if let Err(e) = writer.pong(data).await {
                        break Err(e.into());
                    }
                    continue;
                }
                Frame::Pong(_) => {
                    debug!("Pong from tunnel {}", subdomain);
                    continue;
                }
                Frame::Close => break Ok(()),
            };

            match ControlCodec::decode(&data) {
                Ok(ControlMessage::HttpResponse(response)) => {
                    self.pending_requests.deliver(response);
                }
                Ok(ControlMessage::Error(payload)) => {
                    warn!("Tunnel {} reported error: {}", subdomain, payload.message);
                }
                Ok(other) => {
                    debug!(
                        "Ignoring {} from tunnel {}",
                        other.message_type(),
                        subdomain
                    );
                }
                Err(e) => {
                    error!("Malformed frame from tunnel {}: {}", subdomain, e);
                    break Err(e.into());
                }
            }
        };

        heartbeat.abort();
        result
    }
}

/// Ping on a fixed period until a write fails
async fn heartbeat(writer: Arc<ControlWriter>, period: Duration, subdomain: String) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        debug!("Sending ping to tunnel {}", subdomain);
        if let Err(e) = writer.ping().await {
            warn!("Failed to ping tunnel {}: {}", subdomain, e);
            return;
        }
    }
}

/// Next control message, answering pings along the way
async fn read_message<R: FrameStream>(
    stream: &mut R,
    writer: &ControlWriter,
) -> Result<Option<ControlMessage>, SessionError> {
    loop {
        let data = match stream.recv_frame().await? {
            Some(Frame::Text(text)) => text.into_bytes(),
            Some(Frame::Binary(data)) => data,
            Some(Frame::Ping(data)) => {
                writer.pong(data).await?;
                continue;
            }
            Some(Frame::Pong(_)) => continue,
            Some(Frame::Close) | None => return Ok(None),
        };
        return Ok(Some(ControlCodec::decode(&data)?));
    }
}
