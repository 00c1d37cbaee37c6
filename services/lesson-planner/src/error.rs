//! HTTP error responses
//!
//! Every handler failure renders as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use generation::GenerateError;

use crate::backend::BackendError;

/// A failed request, ready to render.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing x-user-email header",
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Conflict(msg) => Self::new(StatusCode::CONFLICT, "conflict", msg),
            other => Self::new(
                StatusCode::BAD_GATEWAY,
                "backend_error",
                other.to_string(),
            ),
        }
    }
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        if err.is_saturation() {
            Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "system_saturated",
                format!("system saturated, try again later: {err}"),
            )
        } else {
            Self::new(StatusCode::BAD_GATEWAY, "generation_error", err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let body = serde_json::json!({
            "error": {
                "type": self.kind,
                "message": self.message,
                "request_id": request_id,
            }
        });
        (
            self.status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::ProviderError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn renders_error_envelope_with_request_id() {
        let response = ApiError::bad_request("topic is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_request");
        assert_eq!(json["error"]["message"], "topic is required");
        let request_id = json["error"]["request_id"].as_str().unwrap();
        assert!(request_id.starts_with("req_"), "got: {request_id}");
        assert_eq!(request_id.len(), 4 + 32);
    }

    #[test]
    fn saturation_maps_to_503() {
        let err = ApiError::from(GenerateError::PoolEmpty("none".into()));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.kind, "system_saturated");

        let err = ApiError::from(GenerateError::RetriesExhausted { attempts: 3 });
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn provider_failure_maps_to_502() {
        let err = ApiError::from(GenerateError::Provider(ProviderError::Transport(
            "reset".into(),
        )));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind, "generation_error");
    }

    #[test]
    fn backend_errors_map_by_kind() {
        assert_eq!(
            ApiError::from(BackendError::Conflict("dup".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(BackendError::Remote("down".into())).status,
            StatusCode::BAD_GATEWAY
        );
    }
}
