//! Client session tests against an in-memory server and a real local HTTP service

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{any, get};
use axum::{Json, Router};
use publictunnel_client::{ClientConfig, ClientState, TunnelClient, TunnelError};
use publictunnel_proto::{
    append_header, ControlCodec, ControlMessage, ErrorPayload, Headers, HttpRequestPayload,
    HttpResponsePayload, RegisterAckPayload,
};
use publictunnel_transport::memory::{self, MemorySink, MemoryStream};
use publictunnel_transport::{Frame, FrameSink, FrameStream};
use std::sync::Arc;
use std::time::Duration;

/// Start a local service and return its port
async fn start_local_service() -> u16 {
    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"ok": true})) }))
        .route("/moved", get(|| async { Redirect::temporary("/health") }))
        .route(
            "/echo",
            any(|request: Request| async move {
                let method = request.method().to_string();
                let uri = request.uri().to_string();
                let marker = request
                    .headers()
                    .get("x-marker")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                (
                    StatusCode::CREATED,
                    [("x-method", method), ("x-uri", uri), ("x-marker", marker)],
                    body,
                )
                    .into_response()
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

struct FakeServer {
    sink: MemorySink,
    stream: MemoryStream,
}

impl FakeServer {
    async fn send(&mut self, msg: ControlMessage) {
        let text = ControlCodec::encode(&msg).unwrap();
        self.sink.send_frame(Frame::Text(text)).await.unwrap();
    }

    async fn recv(&mut self) -> ControlMessage {
        match self.stream.recv_frame().await.unwrap() {
            Some(Frame::Text(text)) => ControlCodec::decode(text.as_bytes()).unwrap(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    async fn request(&mut self, id: &str, method: &str, path: &str) -> HttpResponsePayload {
        self.send(ControlMessage::HttpRequest(HttpRequestPayload {
            id: id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }))
        .await;
        match self.recv().await {
            ControlMessage::HttpResponse(response) => response,
            other => panic!("Expected HTTP_RESPONSE, got {:?}", other),
        }
    }
}

fn start_client(
    local_port: u16,
    subdomain: Option<&str>,
) -> (
    Arc<TunnelClient>,
    FakeServer,
    tokio::task::JoinHandle<Result<(), TunnelError>>,
) {
    let config = ClientConfig::builder()
        .server_url("http://localhost:4000")
        .local_host("127.0.0.1")
        .local_port(local_port)
        .subdomain(subdomain.map(str::to_string))
        .build()
        .unwrap();
    let client = Arc::new(TunnelClient::new(config).unwrap());

    let (client_end, server_end) = memory::pair();
    let (sink, stream) = client_end.split();
    let runner = client.clone();
    let task = tokio::spawn(async move { runner.run_session(sink, stream).await });

    let (sink, stream) = server_end.split();
    (client, FakeServer { sink, stream }, task)
}

async fn accept_registration(server: &mut FakeServer, subdomain: &str) {
    match server.recv().await {
        ControlMessage::Register(register) => assert_eq!(register.subdomain, subdomain),
        other => panic!("Expected REGISTER, got {:?}", other),
    }
    server
        .send(ControlMessage::RegisterAck(RegisterAckPayload::assigned(
            subdomain,
            format!("http://{}.publictunnel.com", subdomain),
        )))
        .await;
}

#[tokio::test]
async fn test_registration_publishes_active_state() {
    let port = start_local_service().await;
    let (client, mut server, _task) = start_client(port, Some("demo"));
    let mut state = client.state();

    accept_registration(&mut server, "demo").await;

    let active = state
        .wait_for(|s| matches!(s, ClientState::Active { .. }))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        active,
        ClientState::Active {
            subdomain: "demo".to_string(),
            public_url: "http://demo.publictunnel.com".to_string(),
        }
    );
}

#[tokio::test]
async fn test_empty_subdomain_is_sent_as_empty() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, None);
    accept_registration(&mut server, "").await;
}

#[tokio::test]
async fn test_request_is_executed_locally() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    let response = server.request("req-1", "GET", "/health").await;
    assert_eq!(response.id, "req-1");
    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn test_request_preserves_method_path_headers_and_body() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    let mut headers = Headers::new();
    append_header(&mut headers, "x-marker", "42");
    append_header(&mut headers, "host", "demo.publictunnel.com");
    server
        .send(ControlMessage::HttpRequest(HttpRequestPayload {
            id: "req-2".to_string(),
            method: "PUT".to_string(),
            path: "/echo?a=1&b=2".to_string(),
            headers,
            body: b"payload".to_vec(),
        }))
        .await;

    let response = match server.recv().await {
        ControlMessage::HttpResponse(response) => response,
        other => panic!("Expected HTTP_RESPONSE, got {:?}", other),
    };
    assert_eq!(response.status, 201);
    assert_eq!(response.headers["x-method"], vec!["PUT"]);
    assert_eq!(response.headers["x-uri"], vec!["/echo?a=1&b=2"]);
    assert_eq!(response.headers["x-marker"], vec!["42"]);
    assert_eq!(response.body, b"payload");
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    let response = server.request("req-3", "GET", "/moved").await;
    assert_eq!(response.status, 307);
    assert_eq!(response.headers["location"], vec!["/health"]);
}

#[tokio::test]
async fn test_concurrent_requests_are_answered_by_id() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    for i in 0..10 {
        server
            .send(ControlMessage::HttpRequest(HttpRequestPayload {
                id: format!("req-{}", i),
                method: "POST".to_string(),
                path: "/echo".to_string(),
                body: format!("body-{}", i).into_bytes(),
                ..Default::default()
            }))
            .await;
    }

    for _ in 0..10 {
        match server.recv().await {
            ControlMessage::HttpResponse(response) => {
                let n = response.id.trim_start_matches("req-");
                assert_eq!(response.body, format!("body-{}", n).into_bytes());
            }
            other => panic!("Expected HTTP_RESPONSE, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_ping_is_answered() {
    let port = start_local_service().await;
    let (_client, mut server, _task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    server.sink.send_frame(Frame::Ping(vec![1, 2])).await.unwrap();
    assert_eq!(
        server.stream.recv_frame().await.unwrap(),
        Some(Frame::Pong(vec![1, 2]))
    );
}

#[tokio::test]
async fn test_rejected_registration_terminates() {
    let port = start_local_service().await;
    let (client, mut server, task) = start_client(port, Some("demo"));

    server.recv().await;
    server
        .send(ControlMessage::RegisterAck(RegisterAckPayload::rejected(
            "Subdomain 'demo' is unavailable",
        )))
        .await;

    let result = task.await.unwrap();
    match result {
        Err(TunnelError::RegistrationRejected(message)) => {
            assert!(message.contains("unavailable"))
        }
        other => panic!("Unexpected result {:?}", other),
    }
    assert_eq!(*client.state().borrow(), ClientState::Terminated);
}

#[tokio::test]
async fn test_error_frames_do_not_terminate() {
    let port = start_local_service().await;
    let (_client, mut server, task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    server
        .send(ControlMessage::Error(ErrorPayload {
            message: "heads up".to_string(),
        }))
        .await;

    let response = server.request("req-4", "GET", "/health").await;
    assert_eq!(response.status, 200);
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_server_close_terminates_with_error() {
    let port = start_local_service().await;
    let (client, mut server, task) = start_client(port, Some("demo"));
    accept_registration(&mut server, "demo").await;

    server.sink.close().await.unwrap();

    assert!(matches!(
        task.await.unwrap(),
        Err(TunnelError::TunnelClosed(_))
    ));
    assert_eq!(*client.state().borrow(), ClientState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out() {
    let config = ClientConfig::builder()
        .server_url("http://localhost:4000")
        .read_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let client = TunnelClient::new(config).unwrap();

    let (client_end, _server_end) = memory::pair();
    let (sink, stream) = client_end.split();

    let result = client.run_session(sink, stream).await;
    assert!(matches!(result, Err(TunnelError::ReadTimeout(_))));
}
