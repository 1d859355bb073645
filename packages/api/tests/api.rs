// ABOUTME: REST endpoint tests driven through the router with oneshot requests
// ABOUTME: Full stack behind the handlers: fake runtime, real lifecycle, broker and registry

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use roost_api::{create_api_router, AppState};
use roost_lifecycle::{LifecycleConfig, LifecycleManager};
use roost_registry::InstanceRegistry;
use roost_runtime::fake::FakeRuntime;
use roost_runtime::RetryPolicy;
use roost_terminal::{BrokerConfig, SessionBroker};

struct Harness {
    router: Router,
    runtime: FakeRuntime,
    _dir: TempDir,
}

async fn setup_with_limit(max_instances_per_owner: i64) -> Harness {
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

    let router = create_api_router(AppState {
        registry,
        lifecycle,
        broker,
        max_instances_per_owner,
    });
    Harness {
        router,
        runtime,
        _dir: dir,
    }
}

async fn setup() -> Harness {
    setup_with_limit(10).await
}

struct Caller<'a> {
    user: Option<&'a str>,
    admin: bool,
}

const ALICE: Caller<'static> = Caller {
    user: Some("alice"),
    admin: false,
};
const BOB: Caller<'static> = Caller {
    user: Some("bob"),
    admin: false,
};
const ADMIN: Caller<'static> = Caller {
    user: Some("root"),
    admin: true,
};
const ANONYMOUS: Caller<'static> = Caller {
    user: None,
    admin: false,
};

async fn send(
    router: &Router,
    method: Method,
    path: &str,
    caller: &Caller<'_>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(user) = caller.user {
        builder = builder.header("x-roost-user", user);
    }
    if caller.admin {
        builder = builder.header("x-roost-admin", "true");
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(router: &Router, caller: &Caller<'_>, slug: &str) -> (StatusCode, Value) {
    send(
        router,
        Method::POST,
        "/instances",
        caller,
        Some(json!({ "subdomain": slug })),
    )
    .await
}

#[tokio::test]
async fn create_returns_created_instance() {
    let h = setup().await;
    let (status, body) = create(&h.router, &ALICE, "demo1").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["subdomain"], "demo1");
    assert_eq!(body["ownerId"], "alice");
    assert_eq!(body["status"], "running");
    assert_eq!(body["containerRef"], "roost-demo1");
    assert!(h.runtime.has_container("roost-demo1"));
}

#[tokio::test]
async fn identity_header_is_required() {
    let h = setup().await;
    let (status, body) = create(&h.router, &ANONYMOUS, "demo1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("identity"));

    let (status, _) = send(&h.router, Method::GET, "/instances", &ANONYMOUS, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_slug_is_400_taken_is_409() {
    let h = setup().await;

    let (status, _) = create(&h.router, &ALICE, "Bad_Slug").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(&h.router, &ALICE, "demo1").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = create(&h.router, &BOB, "demo1").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn plan_capacity_is_enforced() {
    let h = setup_with_limit(2).await;
    create(&h.router, &ALICE, "one").await;
    create(&h.router, &ALICE, "two").await;

    let (status, body) = create(&h.router, &ALICE, "three").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("limit"));

    // Admins are exempt from the cap.
    let (status, _) = create(&h.router, &ADMIN, "admin1").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn list_returns_only_the_callers_instances() {
    let h = setup().await;
    create(&h.router, &ALICE, "demo1").await;
    create(&h.router, &ALICE, "demo2").await;
    create(&h.router, &BOB, "other1").await;

    let (status, body) = send(&h.router, Method::GET, "/instances", &ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["subdomain"].as_str().unwrap())
        .collect();
    assert_eq!(slugs.len(), 2);
    assert!(slugs.contains(&"demo1"));
    assert!(slugs.contains(&"demo2"));
}

#[tokio::test]
async fn get_enforces_ownership() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let path = format!("/instances/{}", created["id"].as_str().unwrap());

    let (status, _) = send(&h.router, Method::GET, &path, &BOB, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&h.router, Method::GET, &path, &ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.router, Method::GET, &path, &ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subdomain"], "demo1");
}

#[tokio::test]
async fn unknown_instance_is_404() {
    let h = setup().await;
    let (status, _) = send(&h.router, Method::GET, "/instances/ghost", &ALICE, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_and_start_round_trip() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send(
        &h.router,
        Method::POST,
        &format!("/instances/{}/stop", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    // Stop is idempotent.
    let (status, body) = send(
        &h.router,
        Method::POST,
        &format!("/instances/{}/stop", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    let (status, body) = send(
        &h.router,
        Method::POST,
        &format!("/instances/{}/start", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn rebuild_returns_the_running_instance() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send(
        &h.router,
        Method::POST,
        &format!("/instances/{}/rebuild", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["id"], created["id"]);
}

#[tokio::test]
async fn delete_succeeds_even_when_cleanup_fails() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let id = created["id"].as_str().unwrap();

    h.runtime.fail_next("remove", "daemon busy");
    let (status, body) = send(
        &h.router,
        Method::DELETE,
        &format!("/instances/{}", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = send(
        &h.router,
        Method::GET,
        &format!("/instances/{}", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_enforces_ownership() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(
        &h.router,
        Method::DELETE,
        &format!("/instances/{}", id),
        &BOB,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logs_endpoint_returns_container_tail() {
    let h = setup().await;
    let (_, created) = create(&h.router, &ALICE, "demo1").await;
    let id = created["id"].as_str().unwrap();
    h.runtime.set_logs("roost-demo1", "gateway listening on :8080\n");

    let (status, body) = send(
        &h.router,
        Method::GET,
        &format!("/instances/{}/logs?tail=10", id),
        &ALICE,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["logs"].as_str().unwrap().contains("gateway listening"));
}

#[tokio::test]
async fn session_count_requires_admin() {
    let h = setup().await;

    let (status, _) = send(&h.router, Method::GET, "/terminal/sessions", &ALICE, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&h.router, Method::GET, "/terminal/sessions", &ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 0);
}
