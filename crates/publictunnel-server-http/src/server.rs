//! Relay server: status page, control endpoint and tunnel ingress on one listener
use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use publictunnel_control::{
    HttpRelay, PendingRequests, RelayOutcome, RelayRequest, TunnelHandler, TunnelRegistry,
};
use publictunnel_proto::{append_header, is_hop_by_hop, Headers, HttpResponsePayload, CONTROL_PATH};
use publictunnel_router::{HostRoute, HostRouter};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::socket;

/// Body of the status page
pub const STATUS_TEXT: &str = "PublicTunnel Server is running. Use the client to connect.";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

struct ServerState {
    host_router: HostRouter,
    handler: TunnelHandler,
    relay: HttpRelay,
    max_body_size: usize,
}

type SharedState = Arc<ServerState>;

/// The relay server
pub struct TunnelServer {
    config: ServerConfig,
    registry: TunnelRegistry,
    pending_requests: PendingRequests,
    state: SharedState,
}

impl TunnelServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = TunnelRegistry::new();
        let pending_requests = PendingRequests::new();

        let handler = TunnelHandler::new(
            registry.clone(),
            pending_requests.clone(),
            config.tunnel_domain.clone(),
        )
        .with_heartbeat(config.heartbeat);
        let relay = HttpRelay::new(registry.clone(), pending_requests.clone())
            .with_response_timeout(config.response_timeout);

        let state = Arc::new(ServerState {
            host_router: HostRouter::new(&config.domain, &config.tunnel_domain, &config.aliases),
            handler,
            relay,
            max_body_size: config.max_body_size,
        });

        Self {
            config,
            registry,
            pending_requests,
            state,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live tunnels
    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Requests waiting for a tunnel's answer
    pub fn pending_requests(&self) -> &PendingRequests {
        &self.pending_requests
    }

    /// Control handler shared by every upgraded connection
    pub fn handler(&self) -> &TunnelHandler {
        &self.state.handler
    }

    /// Build the axum router. Every request goes through Host-based dispatch.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(self) -> Result<(), ServerError> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::BindError {
                address: address.clone(),
                port: self.config.port,
                reason: e.to_string(),
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve until `shutdown` completes
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!("PublicTunnel server listening on {}", local_addr);
        info!(
            "Control domain: {}, tunnels under *.{}",
            self.config.domain, self.config.tunnel_domain
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("PublicTunnel server stopped");
        Ok(())
    }
}

async fn dispatch(State(state): State<SharedState>, request: Request) -> Response {
    let host = request_host(&request);

    match state.host_router.route(&host) {
        HostRoute::Control if request.uri().path() == CONTROL_PATH => {
            control_upgrade(state, request).await
        }
        HostRoute::Control => status_page(),
        HostRoute::Tunnel(subdomain) => proxy(state, subdomain, request).await,
        HostRoute::Unknown => {
            debug!("No route for host '{}'", host);
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

fn request_host(request: &Request) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
        .unwrap_or_default()
}

fn status_page() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        STATUS_TEXT,
    )
        .into_response()
}

async fn control_upgrade(state: SharedState, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    let scheme = match parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Rejected control upgrade: {}", rejection);
            return rejection.into_response();
        }
    };

    upgrade.on_upgrade(move |ws| async move {
        let (sink, stream) = socket::split(ws);
        // The handler logs its own outcome
        let _ = state.handler.handle_connection(sink, stream, scheme).await;
    })
}

async fn proxy(state: SharedState, subdomain: String, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            let too_large = e
                .into_inner()
                .downcast_ref::<http_body_util::LengthLimitError>()
                .is_some();
            if too_large {
                warn!(
                    "Request body for {} exceeds {} bytes",
                    subdomain, state.max_body_size
                );
                return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
            }
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let relay_request = RelayRequest {
        method: parts.method.to_string(),
        path,
        headers: to_wire_headers(&parts.headers),
        body: body.to_vec(),
    };

    debug!(
        "Proxying {} {} for {}",
        relay_request.method, relay_request.path, subdomain
    );

    match state.relay.forward(&subdomain, relay_request).await {
        RelayOutcome::Response(response) => render(response),
        RelayOutcome::NotFound => (StatusCode::NOT_FOUND, "Tunnel not found").into_response(),
        RelayOutcome::BadGateway(message) => (StatusCode::BAD_GATEWAY, message).into_response(),
        RelayOutcome::GatewayTimeout => {
            (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout").into_response()
        }
    }
}

fn to_wire_headers(headers: &HeaderMap) -> Headers {
    let mut wire = Headers::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => append_header(&mut wire, name.as_str(), value),
            Err(_) => debug!("Skipping non UTF-8 value for header {}", name),
        }
    }
    wire
}

/// Replay a client's response, minus hop-by-hop headers
fn render(payload: HttpResponsePayload) -> Response {
    let Ok(status) = StatusCode::from_u16(payload.status) else {
        warn!(
            "Tunnel returned invalid status {} for request {}",
            payload.status, payload.id
        );
        return (StatusCode::BAD_GATEWAY, "Invalid response from tunnel").into_response();
    };

    let mut response = Response::new(Body::from(Bytes::from(payload.body)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, values) in &payload.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Skipping invalid header name {:?}", name);
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => debug!("Skipping invalid value for header {}", name),
            }
        }
    }

    response
}
