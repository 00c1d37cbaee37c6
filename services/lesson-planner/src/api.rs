//! Teacher-facing API: login, form catalog, plan generation and history
//!
//! Endpoints:
//! - POST   /api/login       check an email against the allow-list
//! - GET    /api/catalog     countries, grades, inclusion needs, modes
//! - POST   /api/plans       generate (and save) a lesson plan
//! - GET    /api/plans       saved plans, newest first
//! - DELETE /api/plans/{id}  remove a saved plan
//!
//! Every endpoint except login and catalog identifies the caller with the
//! `x-user-email` header, re-checked on each request.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use generation::GenerationRequest;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::backend::NewPlan;
use crate::catalog::{self, GENERIC_COUNTRY, Mode};
use crate::error::ApiError;
use crate::prompt::{self, CurriculumContext, PlanForm};

pub const USER_HEADER: &str = "x-user-email";

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct User {
    pub email: String,
    pub admin: bool,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Decide whether `email` may use the service.
///
/// Admins always pass. Anyone else must be on the allow-list; a failed
/// lookup denies.
async fn check_access(state: &AppState, email: &str) -> Option<User> {
    if state.is_admin(email) {
        return Some(User {
            email: email.to_string(),
            admin: true,
        });
    }
    match state.backend.is_email_authorized(email).await {
        Ok(true) => Some(User {
            email: email.to_string(),
            admin: false,
        }),
        Ok(false) => None,
        Err(e) => {
            warn!(error = %e, "allow-list lookup failed, denying");
            None
        }
    }
}

/// Resolve the caller from the `x-user-email` header.
pub async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let email = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(ApiError::unauthorized)?;

    check_access(state, &email)
        .await
        .ok_or_else(|| ApiError::forbidden(format!("{email} is not authorized")))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() {
        return Err(ApiError::bad_request("email is required"));
    }

    let user = check_access(&state, &email).await.ok_or_else(|| {
        info!(email = %email, "login denied");
        ApiError::forbidden("email is not on the authorized list")
    })?;

    info!(email = %user.email, admin = user.admin, "login accepted");
    Ok(Json(serde_json::json!({
        "email": user.email,
        "admin": user.admin,
    })))
}

/// GET /api/catalog
pub async fn get_catalog() -> impl IntoResponse {
    Json(catalog::to_json())
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub inclusions: Vec<String>,
}

/// POST /api/plans
#[instrument(skip_all, fields(user = tracing::field::Empty))]
pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authorize(&state, &headers).await?;
    tracing::Span::current().record("user", user.email.as_str());

    let topic = body.topic.trim();
    let grade = body.grade.trim();
    if topic.is_empty() {
        return Err(ApiError::bad_request("topic is required"));
    }
    if grade.is_empty() {
        return Err(ApiError::bad_request("grade is required"));
    }

    let inclusions = body
        .inclusions
        .iter()
        .map(|id| {
            catalog::inclusion(id)
                .ok_or_else(|| ApiError::bad_request(format!("unknown inclusion: {id}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let country = match body.country.trim().to_ascii_uppercase() {
        code if code.is_empty() => GENERIC_COUNTRY.to_string(),
        code => code,
    };
    let country = country.as_str();
    let context = curriculum_context(&state, country).await;

    let form = PlanForm {
        topic,
        grade,
        mode: body.mode,
        inclusions,
    };
    let request =
        GenerationRequest::new(prompt::build(&context, &form)).with_max_attempts(state.max_attempts);

    let content = state.controller.generate(&request).await?;
    info!(country, mode = ?body.mode, chars = content.len(), "plan generated");

    let saved = match state
        .backend
        .save_plan(NewPlan {
            topic: topic.to_string(),
            grade: grade.to_string(),
            content: content.clone(),
        })
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to save plan to history");
            false
        }
    };

    Ok(Json(serde_json::json!({
        "topic": topic,
        "grade": grade,
        "country": country,
        "content": content,
        "saved": saved,
    })))
}

/// Norms for `country`, or generic defaults when there are none or the
/// lookup fails.
async fn curriculum_context(state: &AppState, country: &str) -> CurriculumContext {
    if country == GENERIC_COUNTRY {
        return CurriculumContext::defaults(country);
    }
    match state.backend.country_norms(country).await {
        Ok(Some(norms)) => norms.into(),
        Ok(None) => CurriculumContext::defaults(country),
        Err(e) => {
            warn!(country, error = %e, "country norms lookup failed, using defaults");
            CurriculumContext::defaults(country)
        }
    }
}

/// GET /api/plans
pub async fn list_plans(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers).await?;
    let plans = state.backend.list_plans().await?;
    Ok(Json(serde_json::json!({ "plans": plans })))
}

/// DELETE /api/plans/{id}
pub async fn delete_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authorize(&state, &headers).await?;
    state.backend.delete_plan(id).await?;
    info!(id, user = %user.email, "plan deleted");
    Ok(StatusCode::NO_CONTENT)
}
