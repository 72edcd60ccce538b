use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("linked service {0} not found")]
    NotFound(u64),

    #[error("code execution timeout ({} seconds)", .0.as_secs())]
    ExecutionTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                reason.clone(),
            ),
            AppError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Linked service not found".to_string(),
            ),
            AppError::ExecutionTimeout(limit) => (
                StatusCode::REQUEST_TIMEOUT,
                "execution_timeout",
                format!("Code execution timeout ({} seconds)", limit.as_secs()),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": msg,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_maps_to_400() {
        let resp = AppError::validation("Missing required field: name").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Missing required field: name");
        assert_eq!(json["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let resp = AppError::NotFound(7).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "Linked service not found");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_408() {
        let resp = AppError::ExecutionTimeout(Duration::from_secs(30)).into_response();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            body_json(resp).await["error"],
            "Code execution timeout (30 seconds)"
        );
    }

    #[tokio::test]
    async fn test_internal_hides_details() {
        let resp = AppError::from(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "internal server error");
        assert!(!json.to_string().contains("disk on fire"));
    }
}
