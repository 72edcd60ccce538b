use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::models::service::{LinkedService, ServiceDescriptor, ServicePatch};
use crate::registry::TestReport;
use crate::sandbox::ExecutionResult;
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
}

/// Malformed JSON is a client error like any other validation failure.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// ── Linked Services ──────────────────────────────────────────

/// GET /api/linked-services — every registered service, in creation order
pub async fn list_linked_services(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<LinkedService>> {
    Json(state.registry.list().await)
}

/// POST /api/linked-services — register and probe a new service
pub async fn create_linked_service(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ServiceDescriptor>, JsonRejection>,
) -> Result<(StatusCode, Json<LinkedService>), AppError> {
    let descriptor = body(payload)?;
    let created = state.registry.create(descriptor).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/linked-services/:id/test — re-run the connection probe
pub async fn test_linked_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<TestReport>, AppError> {
    Ok(Json(state.registry.test(id).await?))
}

/// PUT /api/linked-services/:id — partial update
pub async fn update_linked_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    payload: Result<Json<ServicePatch>, JsonRejection>,
) -> Result<Json<LinkedService>, AppError> {
    let patch = body(payload)?;
    Ok(Json(state.registry.update(id, patch).await?))
}

/// DELETE /api/linked-services/:id — idempotent removal
pub async fn delete_linked_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<serde_json::Value> {
    state.registry.delete(id).await;
    Json(json!({ "message": "Linked service deleted" }))
}

// ── Code Execution ───────────────────────────────────────────

/// POST /api/code/execute — run a snippet in the sandbox
pub async fn execute_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, AppError> {
    let req = body(payload)?;
    Ok(Json(state.sandbox.execute(&req.code).await?))
}
