// ABOUTME: End-to-end terminal channel test over a real WebSocket connection
// ABOUTME: Serves the API on an ephemeral port and speaks the control protocol as a client

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use roost_api::{create_api_router, AppState};
use roost_lifecycle::{LifecycleConfig, LifecycleManager};
use roost_registry::InstanceRegistry;
use roost_runtime::fake::FakeRuntime;
use roost_runtime::{ContainerRuntime, RetryPolicy};
use roost_terminal::{BrokerConfig, SessionBroker};

async fn serve() -> (u16, Arc<LifecycleManager>, FakeRuntime, TempDir) {
    let pool = sqlx::SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");
    roost_registry::MIGRATOR
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let dir = TempDir::new().expect("Failed to create temp dir");
    let registry = Arc::new(InstanceRegistry::new(pool, 20000));
    let runtime = FakeRuntime::new();
    let broker = Arc::new(SessionBroker::new(
        registry.clone(),
        Arc::new(runtime.clone()),
        BrokerConfig {
            ready_policy: RetryPolicy::new(3, Duration::from_millis(10)),
            ..Default::default()
        },
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        Arc::new(runtime.clone()),
        broker.clone(),
        LifecycleConfig {
            base_domain: "roost.test".to_string(),
            data_dir: dir.path().join("instances"),
            tools_dir: dir.path().join("tools"),
            setup_policy: RetryPolicy::new(3, Duration::from_millis(10)),
            ..Default::default()
        },
    ));

    let app = axum::Router::new().nest(
        "/api",
        create_api_router(AppState {
            registry,
            lifecycle: lifecycle.clone(),
            broker,
            max_instances_per_owner: 10,
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, lifecycle, runtime, dir)
}

async fn connect(
    port: u16,
    user: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let mut request = format!("ws://127.0.0.1:{}/api/terminal", port)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-roost-user", user.parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

async fn next_text(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for text frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn terminal_channel_round_trip() {
    let (port, lifecycle, runtime, _dir) = serve().await;
    let instance = lifecycle.create("alice", "demo1").await.unwrap();

    let mut ws = connect(port, "alice").await;
    ws.send(Message::text(
        json!({ "type": "connect", "instance_id": instance.id }).to_string(),
    ))
    .await
    .unwrap();

    let ready = next_text(&mut ws).await;
    assert_eq!(ready["type"], "ready");
    assert!(!ready["session_id"].as_str().unwrap().is_empty());

    // Raw input comes back as binary output (the fake runtime echoes).
    ws.send(Message::Binary(b"echo hi\n".to_vec().into()))
        .await
        .unwrap();
    let data = loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for output")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Binary(data) = msg {
            break data;
        }
    };
    assert!(String::from_utf8_lossy(&data).contains("hi"));

    // Resizes are accepted without a reply.
    ws.send(Message::text(
        json!({ "type": "resize", "cols": 120, "rows": 40 }).to_string(),
    ))
    .await
    .unwrap();

    // Container stop surfaces as an exit control message.
    runtime.stop("roost-demo1").await.unwrap();
    let exit = next_text(&mut ws).await;
    assert_eq!(exit["type"], "exit");
}

#[tokio::test]
async fn connecting_to_a_foreign_instance_fails() {
    let (port, lifecycle, _runtime, _dir) = serve().await;
    let instance = lifecycle.create("alice", "demo1").await.unwrap();

    let mut ws = connect(port, "mallory").await;
    ws.send(Message::text(
        json!({ "type": "connect", "instance_id": instance.id }).to_string(),
    ))
    .await
    .unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("authorized"));
}

#[tokio::test]
async fn first_frame_must_be_connect() {
    let (port, lifecycle, _runtime, _dir) = serve().await;
    lifecycle.create("alice", "demo1").await.unwrap();

    let mut ws = connect(port, "alice").await;
    ws.send(Message::Binary(b"raw bytes".to_vec().into()))
        .await
        .unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("connect"));
}
