// ABOUTME: Integration tests for the proxy dispatcher against a stub backend
// ABOUTME: Covers unknown slugs, stopped instances, verbatim forwarding, and dead backends

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use roost_proxy::{ProxyConfig, ProxyDispatcher};
use roost_registry::{InstanceRegistry, InstanceStatus, NewInstance};

async fn setup() -> (sqlx::SqlitePool, Arc<InstanceRegistry>, ProxyDispatcher) {
    let pool = sqlx::SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");
    roost_registry::MIGRATOR
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let registry = Arc::new(InstanceRegistry::new(pool.clone(), 20000));
    let dispatcher = ProxyDispatcher::new(
        registry.clone(),
        ProxyConfig {
            base_domain: "roost.test".to_string(),
            route_prefix: "i".to_string(),
            api_subdomain: "api".to_string(),
            external_scheme: "https".to_string(),
        },
    );
    (pool, registry, dispatcher)
}

/// Stub instance gateway that reports what it received.
async fn spawn_backend() -> u16 {
    async fn echo(req: Request) -> Json<Value> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Json(json!({
            "path": req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
            "forwardedHost": header("x-forwarded-host"),
            "forwardedProto": header("x-forwarded-proto"),
            "routing": header("x-roost-routing"),
        }))
    }

    let app = Router::new().fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Register a running instance whose gateway port points at `backend_port`.
async fn running_instance(
    pool: &sqlx::SqlitePool,
    registry: &InstanceRegistry,
    slug: &str,
    backend_port: u16,
) {
    let instance = registry
        .create(NewInstance {
            owner_id: "alice".to_string(),
            subdomain: slug.to_string(),
        })
        .await
        .unwrap();
    // Point the allocated gateway port at the stub backend.
    sqlx::query("UPDATE instances SET gateway_port = ? WHERE id = ?")
        .bind(backend_port)
        .bind(&instance.id)
        .execute(pool)
        .await
        .unwrap();
    registry
        .update_status(&instance.id, InstanceStatus::Running)
        .await
        .unwrap();
}

fn request(host: &str, path: &str) -> Request {
    Request::builder()
        .uri(path)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unknown_slug_is_404() {
    let (_pool, _registry, dispatcher) = setup().await;

    let resp = dispatcher.dispatch(request("ghost.roost.test", "/")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("ghost"));
    assert!(message.contains("roost.test"));
}

#[tokio::test]
async fn unroutable_request_is_404() {
    let (_pool, _registry, dispatcher) = setup().await;

    let resp = dispatcher.dispatch(request("roost.test", "/nope")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stopped_instance_is_503() {
    let (_pool, registry, dispatcher) = setup().await;
    registry
        .create(NewInstance {
            owner_id: "alice".to_string(),
            subdomain: "demo1".to_string(),
        })
        .await
        .unwrap();

    let resp = dispatcher.dispatch(request("demo1.roost.test", "/")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("stopped"));
}

#[tokio::test]
async fn subdomain_routing_proxies_verbatim() {
    let (pool, registry, dispatcher) = setup().await;
    let backend_port = spawn_backend().await;
    running_instance(&pool, &registry, "demo1", backend_port).await;

    let resp = dispatcher
        .dispatch(request("demo1.roost.test", "/app/page?x=1"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["path"], "/app/page?x=1");
    assert_eq!(body["forwardedHost"], "demo1.roost.test");
    assert_eq!(body["forwardedProto"], "https");
    assert_eq!(body["routing"], "subdomain");
}

#[tokio::test]
async fn path_routing_strips_the_prefix() {
    let (pool, registry, dispatcher) = setup().await;
    let backend_port = spawn_backend().await;
    running_instance(&pool, &registry, "demo1", backend_port).await;

    let resp = dispatcher
        .dispatch(request("roost.test", "/i/demo1/app/page?x=1"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["path"], "/app/page?x=1");
    assert_eq!(body["routing"], "path");
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    let (pool, registry, dispatcher) = setup().await;
    // Grab a port with no listener behind it.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    running_instance(&pool, &registry, "demo1", dead_port).await;

    let resp = dispatcher.dispatch(request("demo1.roost.test", "/")).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}
