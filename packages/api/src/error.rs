// ABOUTME: API error type and its mapping onto HTTP status codes
// ABOUTME: Every handler returns Result<_, ApiError>; the body is always {"error": message}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use roost_lifecycle::LifecycleError;
use roost_registry::RegistryError;
use roost_terminal::BrokerError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Missing identity header")]
    MissingIdentity,

    #[error("{0}")]
    Forbidden(String),

    #[error("Instance limit reached ({0} per account)")]
    CapacityExceeded(i64),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::CapacityExceeded(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {}", self);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation(_) | LifecycleError::NoContainer(_) => {
                ApiError::Validation(e.to_string())
            }
            LifecycleError::Conflict(_) => ApiError::Conflict(e.to_string()),
            LifecycleError::NotFound(_) => ApiError::NotFound(e.to_string()),
            LifecycleError::Provisioning(_)
            | LifecycleError::Registry(_)
            | LifecycleError::Runtime(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::NotFound(_) | BrokerError::SessionNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            BrokerError::NotAuthorized(_) => ApiError::Forbidden(e.to_string()),
            BrokerError::NoContainer(_) => ApiError::Validation(e.to_string()),
            BrokerError::ContainerNotReady { .. } => ApiError::Unavailable(e.to_string()),
            BrokerError::Registry(_) | BrokerError::Runtime(_) | BrokerError::Stream(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RegistryError::SubdomainTaken(_) => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
