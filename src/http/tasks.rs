use super::{ApiError, AppState};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub namespace: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<crate::model::WorkflowTaskResource>>, ApiError> {
    let tasks = state
        .discovery
        .discover_tasks(query.namespace.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}
