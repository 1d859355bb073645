// ABOUTME: HTTP API layer for Roost providing REST endpoints and routing
// ABOUTME: Integration layer that depends on the domain packages

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use roost_lifecycle::LifecycleManager;
use roost_registry::InstanceRegistry;
use roost_terminal::SessionBroker;

pub mod auth;
pub mod error;
pub mod instances_handlers;
pub mod terminal_handlers;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub broker: Arc<SessionBroker>,
    /// Per-owner instance cap; admins are exempt.
    pub max_instances_per_owner: i64,
}

/// Creates the instances API router
pub fn create_instances_router() -> Router<AppState> {
    Router::new()
        .route("/", post(instances_handlers::create_instance))
        .route("/", get(instances_handlers::list_instances))
        .route("/{id}", get(instances_handlers::get_instance))
        .route("/{id}", delete(instances_handlers::delete_instance))
        .route("/{id}/start", post(instances_handlers::start_instance))
        .route("/{id}/stop", post(instances_handlers::stop_instance))
        .route("/{id}/rebuild", post(instances_handlers::rebuild_instance))
        .route("/{id}/logs", get(instances_handlers::instance_logs))
}

/// Creates the terminal API router
pub fn create_terminal_router() -> Router<AppState> {
    Router::new()
        .route("/", get(terminal_handlers::terminal_ws))
        .route("/sessions", get(terminal_handlers::active_sessions))
}

/// The full `/api` subtree, ready to be nested by the server binary.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .nest("/instances", create_instances_router())
        .nest("/terminal", create_terminal_router())
        .with_state(state)
}
