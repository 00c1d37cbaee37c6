//! Allow-list management
//!
//! Endpoints (admin emails only):
//! - GET    /admin/users       authorized emails, newest first
//! - POST   /admin/users       authorize an email
//! - DELETE /admin/users/{id}  revoke an entry

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::api::{User, authorize, normalize_email};
use crate::error::ApiError;

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let user = authorize(state, headers).await?;
    if !user.admin {
        return Err(ApiError::forbidden("admin access required"));
    }
    Ok(user)
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers).await?;
    let users = state.backend.list_users().await?;
    Ok(Json(serde_json::json!({ "users": users })))
}

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    #[serde(default)]
    pub email: String,
}

/// POST /admin/users
pub async fn add_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let email = normalize_email(&body.email);
    if !email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }

    state.backend.add_user(&email).await?;
    info!(email = %email, by = %admin.email, "email authorized");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "email": email })),
    ))
}

/// DELETE /admin/users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    state.backend.delete_user(id).await?;
    info!(id, by = %admin.email, "authorization revoked");
    Ok(StatusCode::NO_CONTENT)
}
