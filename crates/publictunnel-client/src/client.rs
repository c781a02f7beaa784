//! Client side of a control connection

use publictunnel_proto::{ControlCodec, ControlMessage, HttpRequestPayload, RegisterPayload};
use publictunnel_transport::{websocket, ControlWriter, Frame, FrameSink, FrameStream, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::forwarder::LocalForwarder;

/// Tunnel client errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Registration failed: {0}")]
    RegistrationRejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No frame received for {0:?}")]
    ReadTimeout(Duration),

    #[error("Tunnel closed: {0}")]
    TunnelClosed(String),
}

impl TunnelError {
    /// Returns true if this error is non-recoverable and retrying won't help
    pub fn is_non_recoverable(&self) -> bool {
        matches!(
            self,
            TunnelError::RegistrationRejected(_) | TunnelError::ConfigError(_)
        )
    }
}

/// Lifecycle of a client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Dialing,
    Registering,
    Active {
        subdomain: String,
        public_url: String,
    },
    Terminated,
}

/// Tunnel client
pub struct TunnelClient {
    config: ClientConfig,
    forwarder: Arc<LocalForwarder>,
    state: watch::Sender<ClientState>,
}

impl TunnelClient {
    pub fn new(config: ClientConfig) -> Result<Self, TunnelError> {
        let forwarder = Arc::new(LocalForwarder::new(config.local_url())?);
        let (state, _) = watch::channel(ClientState::Disconnected);
        Ok(Self {
            config,
            forwarder,
            state,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Watch state transitions
    pub fn state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
    }

    /// Dial the server and serve requests until the connection ends
    ///
    /// There is no reconnect: any return is final, and it is always an error.
    pub async fn run(&self) -> Result<(), TunnelError> {
        self.set_state(ClientState::Dialing);
        let url = match self.config.control_url() {
            Ok(url) => url,
            Err(e) => {
                self.set_state(ClientState::Terminated);
                return Err(e);
            }
        };

        info!("Connecting to {}...", url);
        let (sink, stream) = match websocket::connect(&url).await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(ClientState::Terminated);
                return Err(TunnelError::ConnectionError(e.to_string()));
            }
        };

        self.run_session(sink, stream).await
    }

    /// Register and serve over an established connection
    pub async fn run_session<S, R>(&self, sink: S, mut stream: R) -> Result<(), TunnelError>
    where
        S: FrameSink,
        R: FrameStream,
    {
        let writer = Arc::new(ControlWriter::new(sink, self.config.write_timeout));

        self.set_state(ClientState::Registering);
        let register = ControlMessage::Register(RegisterPayload {
            subdomain: self.config.subdomain.clone().unwrap_or_default(),
        });

        let result = match writer.send_message(&register).await {
            Ok(()) => self.read_loop(&mut stream, &writer).await,
            Err(e) => Err(e.into()),
        };

        writer.close().await;
        self.set_state(ClientState::Terminated);
        if let Err(e) = &result {
            error!("Tunnel terminated: {}", e);
        }
        result
    }

    async fn read_loop<R: FrameStream>(
        &self,
        stream: &mut R,
        writer: &Arc<ControlWriter>,
    ) -> Result<(), TunnelError> {
        let read_timeout = self.config.read_timeout;

        loop {
            let frame = match tokio::time::timeout(read_timeout, stream.recv_frame()).await {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    return Err(TunnelError::TunnelClosed(
                        "server closed the connection".to_string(),
                    ))
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(TunnelError::ReadTimeout(read_timeout)),
            };

            let data = match frame {
                Frame::Text(text) => text.into_bytes(),
                Frame::Binary(data) => data,
                Frame::Ping(data) => {
                    writer.pong(data).await?;
                    continue;
                }
                Frame::Pong(_) | Frame::Close => continue,
            };

            let message = match ControlCodec::decode(&data) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Ignoring malformed message from server: {}", e);
                    continue;
                }
            };

            match message {
                ControlMessage::RegisterAck(ack) => match ack.outcome() {
                    Ok((subdomain, url)) => {
                        info!("Tunnel established!");
                        info!("Public URL: {}", url);
                        info!("Forwarding to: {}", self.forwarder.base_url());
                        self.set_state(ClientState::Active {
                            subdomain: subdomain.to_string(),
                            public_url: url.to_string(),
                        });
                    }
                    Err(message) => {
                        return Err(TunnelError::RegistrationRejected(message.to_string()))
                    }
                },
                ControlMessage::HttpRequest(request) => {
                    self.spawn_request(request, writer.clone());
                }
                ControlMessage::Error(payload) => {
                    warn!("Server error: {}", payload.message);
                }
                other => {
                    debug!("Ignoring {} from server", other.message_type());
                }
            }
        }
    }

    /// Serve one request on its own task; the answer goes back through the shared writer
    fn spawn_request(&self, request: HttpRequestPayload, writer: Arc<ControlWriter>) {
        let forwarder = self.forwarder.clone();
        tokio::spawn(async move {
            let response = forwarder.forward(request).await;
            let id = response.id.clone();
            if let Err(e) = writer
                .send_message(&ControlMessage::HttpResponse(response))
                .await
            {
                warn!("Failed to send response for request {}: {}", id, e);
            }
        });
    }
}
