//! End-to-end tests: real server, real clients, real local services, all on loopback

use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use publictunnel_client::{ClientConfig, ClientState, TunnelClient};
use publictunnel_server_http::{
    PendingRequests, ServerConfig, TunnelRegistry, TunnelServer, STATUS_TEXT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

struct RunningServer {
    port: u16,
    registry: TunnelRegistry,
    pending: PendingRequests,
}

async fn start_server(response_timeout: Duration) -> RunningServer {
    let config = ServerConfig::builder()
        .alias("127.0.0.1")
        .response_timeout(response_timeout)
        .build()
        .unwrap();
    let server = TunnelServer::new(config);
    let registry = server.registry().clone();
    let pending = server.pending_requests().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server.serve(listener));

    RunningServer {
        port,
        registry,
        pending,
    }
}

/// Local service answering `/health` with `{"ok":true}` and `/whoami` with `name`
async fn start_local_service(name: &'static str) -> u16 {
    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"ok": true})) }))
        .route("/whoami", get(move || async move { name }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Start a client and wait until it is active; returns the assigned subdomain
async fn start_client(
    server_port: u16,
    local_port: u16,
    subdomain: &str,
) -> (Arc<TunnelClient>, String) {
    let config = ClientConfig::builder()
        .server_url(format!("http://127.0.0.1:{}", server_port))
        .local_host("127.0.0.1")
        .local_port(local_port)
        .subdomain(Some(subdomain.to_string()))
        .build()
        .unwrap();
    let client = Arc::new(TunnelClient::new(config).unwrap());
    let mut state = client.state();

    let runner = client.clone();
    tokio::spawn(async move { runner.run().await });

    let assigned = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| matches!(s, ClientState::Active { .. })),
    )
    .await
    .expect("client did not become active")
    .unwrap()
    .clone();

    match assigned {
        ClientState::Active { subdomain, .. } => (client, subdomain),
        other => panic!("Unexpected state {:?}", other),
    }
}

async fn public_get(server_port: u16, host: &str, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}{}", server_port, path))
        .header("host", host)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_status_page() {
    let server = start_server(Duration::from_secs(30)).await;

    let response = public_get(server.port, "127.0.0.1", "/").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), STATUS_TEXT);
}

#[tokio::test]
async fn test_demo_health_is_relayed() {
    let server = start_server(Duration::from_secs(30)).await;
    let local_port = start_local_service("demo").await;

    let (_client, subdomain) = start_client(server.port, local_port, "demo").await;
    assert_eq!(subdomain, "demo");

    let response = public_get(server.port, "demo.publictunnel.com", "/health").await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"ok": true}));
    assert_eq!(server.pending.count(), 0);
}

#[tokio::test]
async fn test_two_clients_requesting_same_name() {
    let server = start_server(Duration::from_secs(30)).await;
    let first_port = start_local_service("first").await;
    let second_port = start_local_service("second").await;

    let ((_a, first), (_b, second)) = tokio::join!(
        start_client(server.port, first_port, "demo"),
        start_client(server.port, second_port, "demo"),
    );

    let mut names = vec![first.clone(), second.clone()];
    names.sort();
    assert_eq!(names[0], "demo");
    assert!(names[1].starts_with("demo-"));
    assert_eq!(names[1].len(), "demo-".len() + 4);

    // Both are routable, each to its own local service
    for (name, expected) in [(first, "first"), (second, "second")] {
        let host = format!("{}.publictunnel.com", name);
        let response = public_get(server.port, &host, "/whoami").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_unknown_subdomain_is_not_found() {
    let server = start_server(Duration::from_secs(30)).await;

    let response = public_get(server.port, "unknown.publictunnel.com", "/").await;
    assert_eq!(response.status(), 404);
    assert_eq!(server.pending.count(), 0);

    let response = public_get(server.port, "example.com", "/").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_local_service_down_is_bad_gateway() {
    let server = start_server(Duration::from_secs(30)).await;

    // Nothing listens on this port
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let local_port = unused.local_addr().unwrap().port();
    drop(unused);

    let (_client, _) = start_client(server.port, local_port, "down").await;

    let response = public_get(server.port, "down.publictunnel.com", "/").await;
    assert_eq!(response.status(), 502);
    assert!(response
        .text()
        .await
        .unwrap()
        .starts_with("Local request failed"));
}

/// Raw control connection that registers and then never answers
async fn register_raw(
    server_port: u16,
    subdomain: &str,
    forwarded_proto: Option<&str>,
) -> (
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    serde_json::Value,
) {
    let mut request = format!("ws://127.0.0.1:{}/ws", server_port)
        .into_client_request()
        .unwrap();
    if let Some(proto) = forwarded_proto {
        request
            .headers_mut()
            .insert("x-forwarded-proto", proto.parse().unwrap());
    }
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let register = serde_json::json!({"type": "REGISTER", "payload": {"subdomain": subdomain}});
    ws.send(Message::Text(register.to_string())).await.unwrap();

    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let ack: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(ack["type"], "REGISTER_RESP");
                return (ws, ack["payload"].clone());
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected message {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_public_url_scheme_follows_forwarded_proto() {
    let server = start_server(Duration::from_secs(30)).await;

    let (_ws, ack) = register_raw(server.port, "plain", None).await;
    assert_eq!(ack["url"], "http://plain.publictunnel.com");

    let (_ws, ack) = register_raw(server.port, "secure", Some("https")).await;
    assert_eq!(ack["url"], "https://secure.publictunnel.com");
    assert!(ack.get("error").is_none());
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = start_server(Duration::from_secs(1)).await;
    let (mut ws, _) = register_raw(server.port, "silent", None).await;

    // Swallow the relayed request without answering
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["type"], "HTTP_REQUEST");
                assert_eq!(frame["payload"]["path"], "/slow?x=1");
            }
        }
    });

    let started = Instant::now();
    let response = public_get(server.port, "silent.publictunnel.com", "/slow?x=1").await;
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 504);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(server.pending.count(), 0);
    reader.abort();
}

#[tokio::test]
async fn test_disconnect_releases_subdomain() {
    let server = start_server(Duration::from_secs(30)).await;
    let (mut ws, ack) = register_raw(server.port, "gone", None).await;
    assert_eq!(ack["subdomain"], "gone");
    assert!(server.registry.lookup("gone").await.is_some());

    ws.close(None).await.unwrap();
    drop(ws);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.registry.lookup("gone").await.is_some() {
        assert!(Instant::now() < deadline, "binding was not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = public_get(server.port, "gone.publictunnel.com", "/").await;
    assert_eq!(response.status(), 404);

    // Reclaimable straight away
    let (_ws, ack) = register_raw(server.port, "gone", None).await;
    assert_eq!(ack["subdomain"], "gone");
}

#[tokio::test]
async fn test_invalid_subdomain_gets_error_ack() {
    let server = start_server(Duration::from_secs(30)).await;
    let (_ws, ack) = register_raw(server.port, "bad_name", None).await;

    assert!(ack["error"].as_str().unwrap().contains("Invalid subdomain"));
    assert_eq!(server.registry.len().await, 0);
}
