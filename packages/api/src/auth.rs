// ABOUTME: Caller identity for API requests
// ABOUTME: Read from trusted headers injected by the upstream gateway; no auth happens here

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::ApiError;

pub const USER_HEADER: &str = "x-roost-user";
pub const ADMIN_HEADER: &str = "x-roost-admin";

/// The authenticated caller. The upstream gateway terminates authentication
/// and forwards the verified identity on trusted headers.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub is_admin: bool,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::MissingIdentity)?
            .to_string();

        let is_admin = parts
            .headers
            .get(ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self { id, is_admin })
    }
}
