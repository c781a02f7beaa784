//! Tunnel connection handle

use publictunnel_proto::{ControlMessage, HttpRequestPayload};
use publictunnel_router::SubdomainRegistry;
use publictunnel_transport::{ControlWriter, TransportResult};
use std::sync::Arc;
use uuid::Uuid;

/// Registry of live tunnels, keyed by subdomain
pub type TunnelRegistry = SubdomainRegistry<TunnelConnection>;

/// Represents an active tunnel connection
///
/// This is what the registry hands out to the ingress: enough to push a request frame
/// onto the connection. Reading is owned by the session task.
#[derive(Debug)]
pub struct TunnelConnection {
    id: String,
    writer: Arc<ControlWriter>,
}

impl TunnelConnection {
    pub fn new(writer: Arc<ControlWriter>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            writer,
        }
    }

    /// Unique id of this connection, used in logs
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one request frame to the client
    pub async fn send_request(&self, request: HttpRequestPayload) -> TransportResult<()> {
        self.writer
            .send_message(&ControlMessage::HttpRequest(request))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}
