//! Forwarding of public requests over a tunnel

use publictunnel_proto::{Headers, HttpRequestPayload, HttpResponsePayload, RESPONSE_TIMEOUT};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::TunnelRegistry;
use crate::pending_requests::{PendingError, PendingRequests};

/// A public request, already stripped of routing concerns
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// What the ingress should answer
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The client answered
    Response(HttpResponsePayload),
    /// No tunnel owns the subdomain
    NotFound,
    /// The request could not be handed to the client
    BadGateway(String),
    /// The client did not answer in time
    GatewayTimeout,
}

/// Sends requests to tunnels and waits for the correlated response
#[derive(Clone)]
pub struct HttpRelay {
    registry: TunnelRegistry,
    pending_requests: PendingRequests,
    response_timeout: Duration,
}

impl HttpRelay {
    pub fn new(registry: TunnelRegistry, pending_requests: PendingRequests) -> Self {
        Self {
            registry,
            pending_requests,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Relay one request to the tunnel owning `subdomain`
    pub async fn forward(&self, subdomain: &str, request: RelayRequest) -> RelayOutcome {
        let Some(connection) = self.registry.lookup(subdomain).await else {
            debug!("No tunnel for subdomain {}", subdomain);
            return RelayOutcome::NotFound;
        };

        let id = Uuid::new_v4().to_string();
        let slot = self.pending_requests.register(id.clone());

        debug!(
            "Relaying {} {} to tunnel {} as {}",
            request.method, request.path, subdomain, id
        );
        let payload = HttpRequestPayload {
            id,
            method: request.method,
            path: request.path,
            headers: request.headers,
            body: request.body,
        };

        if let Err(e) = connection.send_request(payload).await {
            warn!("Failed to write request to tunnel {}: {}", subdomain, e);
            return RelayOutcome::BadGateway(format!("Tunnel {} is unavailable", subdomain));
        }

        match slot.wait(self.response_timeout).await {
            Ok(response) => RelayOutcome::Response(response),
            Err(PendingError::TimedOut(id)) => {
                warn!(
                    "Tunnel {} did not answer request {} within {:?}",
                    subdomain, id, self.response_timeout
                );
                RelayOutcome::GatewayTimeout
            }
            Err(e @ PendingError::Cancelled(_)) => RelayOutcome::BadGateway(e.to_string()),
        }
    }
}
