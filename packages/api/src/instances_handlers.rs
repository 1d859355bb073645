// ABOUTME: HTTP request handlers for instance operations
// ABOUTME: Ownership is checked here; state transitions go through the lifecycle manager

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use roost_registry::Instance;

use crate::auth::CurrentUser;
use crate::{ApiError, AppState};

const DEFAULT_LOG_TAIL: usize = 100;

/// Load an instance and confirm the caller may act on it.
async fn load_owned(
    state: &AppState,
    user: &CurrentUser,
    id: &str,
) -> Result<Instance, ApiError> {
    let instance = state
        .registry
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance not found: {}", id)))?;
    if instance.owner_id != user.id && !user.is_admin {
        return Err(ApiError::Forbidden(format!(
            "Not authorized for instance {}",
            id
        )));
    }
    Ok(instance)
}

#[derive(Deserialize)]
pub struct CreateInstanceRequest {
    pub subdomain: String,
}

/// Create and start a new instance for the caller
pub async fn create_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    info!(
        "Creating instance '{}' for user {}",
        request.subdomain, user.id
    );

    if !user.is_admin {
        let owned = state.registry.count_by_owner(&user.id).await?;
        if owned >= state.max_instances_per_owner {
            return Err(ApiError::CapacityExceeded(state.max_instances_per_owner));
        }
    }

    let instance = state.lifecycle.create(&user.id, &request.subdomain).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// List the caller's instances
pub async fn list_instances(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let instances = state.registry.find_by_owner(&user.id).await?;
    Ok(Json(instances))
}

/// Get one instance by id
pub async fn get_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    Ok(Json(instance))
}

/// Start a stopped instance
pub async fn start_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    info!("Starting instance {} for user {}", id, user.id);
    let updated = state.lifecycle.start(&instance).await?;
    Ok(Json(updated))
}

/// Stop a running instance
pub async fn stop_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    info!("Stopping instance {} for user {}", id, user.id);
    let updated = state.lifecycle.stop(&instance).await?;
    Ok(Json(updated))
}

/// Replace the instance's container with a fresh one from the current image
pub async fn rebuild_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    info!("Rebuilding instance {} for user {}", id, user.id);
    let updated = state.lifecycle.rebuild(&instance).await?;
    Ok(Json(updated))
}

/// Delete an instance. Succeeds once ownership is confirmed; container and
/// directory cleanup failures are logged inside the lifecycle manager.
pub async fn delete_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    info!("Deleting instance {} for user {}", id, user.id);
    state.lifecycle.delete(&instance).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

/// Tail of the instance container's combined stdout/stderr
pub async fn instance_logs(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let instance = load_owned(&state, &user, &id).await?;
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state.lifecycle.logs(&instance, tail).await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}
