use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::model::ExecutionRecord>, ApiError> {
    state
        .executions
        .get(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown execution: {id}")))
}

pub async fn get_execution_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::model::ExecutionTrace>, ApiError> {
    state
        .execution
        .trace(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown execution: {id}")))
}

/// Cancels an in-flight execution (§5's cancellation-token propagation
/// made reachable from outside the request that started it — a client
/// watching `/api/v1/events/{group}` learns an `executionId` from the
/// `workflow_started` event the instant a run begins, then calls this
/// to cancel it while the original caller, if it used the synchronous
/// `execute` endpoint, is still blocked awaiting that same run).
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.execution.cancel(id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::NotFound(format!(
            "no in-flight execution: {id}"
        )))
    }
}
