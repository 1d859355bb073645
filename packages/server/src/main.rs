// ABOUTME: roostd entry point: config, database, Docker, routers, graceful shutdown
// ABOUTME: /healthz and /api are served directly; everything else falls through to the proxy

use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::Request;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tracing::info;
use tracing_subscriber::EnvFilter;

use roost_api::{create_api_router, AppState};
use roost_lifecycle::{LifecycleConfig, LifecycleManager};
use roost_proxy::{ProxyConfig, ProxyDispatcher};
use roost_registry::InstanceRegistry;
use roost_runtime::{ContainerRuntime, DockerRuntime};
use roost_terminal::{BrokerConfig, SessionBroker};

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!(
        "Starting roostd for {} (route prefix /{}/)",
        config.base_domain, config.route_prefix
    );

    let pool = open_database(&config).await?;
    roost_registry::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let registry = Arc::new(InstanceRegistry::new(pool, config.port_base));
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to the Docker daemon")?,
    );

    let broker = Arc::new(SessionBroker::new(
        registry.clone(),
        runtime.clone(),
        BrokerConfig {
            container_prefix: config.container_prefix.clone(),
            shell_user: config.shell_user.clone(),
            ..Default::default()
        },
    ));
    let lifecycle = Arc::new(LifecycleManager::new(
        registry.clone(),
        runtime.clone(),
        broker.clone(),
        LifecycleConfig {
            base_domain: config.base_domain.clone(),
            external_scheme: config.external_scheme.clone(),
            api_subdomain: config.api_subdomain.clone(),
            image: config.instance_image.clone(),
            data_dir: config.data_dir.clone(),
            tools_dir: config.tools_dir.clone(),
            container_prefix: config.container_prefix.clone(),
            shell_user: config.shell_user.clone(),
            ..Default::default()
        },
    ));
    let dispatcher = Arc::new(ProxyDispatcher::new(
        registry.clone(),
        ProxyConfig {
            base_domain: config.base_domain.clone(),
            route_prefix: config.route_prefix.clone(),
            api_subdomain: config.api_subdomain.clone(),
            external_scheme: config.external_scheme.clone(),
        },
    ));

    let state = AppState {
        registry,
        lifecycle,
        broker,
        max_instances_per_owner: config.max_instances_per_owner,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", create_api_router(state))
        .fallback(move |req: Request<Body>| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(req).await }
        });

    let addr = format!("{}:{}", config.bind_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("roostd listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roostd shut down");
    Ok(())
}

async fn open_database(config: &ServerConfig) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = config.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(&config.db_path)
        .create_if_missing(true);
    SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    info!("Shutdown signal received");
}
