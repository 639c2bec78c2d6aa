use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;

pub async fn list_workflow_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<crate::model::WorkflowVersion>>, ApiError> {
    let versions = state
        .versions
        .list(&name)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(versions))
}
