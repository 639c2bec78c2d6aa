use super::{ApiError, AppState};
use crate::execution::validate_input;
use crate::orchestrator::build_execution_plan;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_take")]
    pub take: u64,
}

fn default_take() -> u64 {
    50
}

#[derive(Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub namespace: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub task_count: usize,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<WorkflowSummary>>, ApiError> {
    let workflows = state
        .discovery
        .discover_workflows(None)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let summaries = workflows
        .into_iter()
        .skip(page.skip as usize)
        .take(page.take as usize)
        .map(|w| WorkflowSummary {
            name: w.name(),
            namespace: w.namespace(),
            description: w.spec.description.clone(),
            tags: w.spec.tags.clone(),
            task_count: w.spec.tasks.len(),
        })
        .collect();
    Ok(Json(summaries))
}

#[derive(Serialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub spec: crate::model::WorkflowSpec,
    pub name: String,
    pub namespace: String,
    pub statistics: Option<crate::repository::WorkflowStatistics>,
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowDetail>, ApiError> {
    let workflow = find_registered(&state, &name).await?;
    let statistics = state
        .executions
        .get_all_workflow_statistics()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .remove(&workflow.name());

    Ok(Json(WorkflowDetail {
        name: workflow.name(),
        namespace: workflow.namespace(),
        spec: workflow.spec,
        statistics,
    }))
}

pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<serde_json::Value>,
) -> Result<Json<crate::model::ExecutionResponse>, ApiError> {
    let workflow = find_registered(&state, &name).await?;

    let validation = validate_input(&workflow, &input);
    if !validation.is_valid {
        return Err(ApiError::BadRequest(
            serde_json::to_value(&validation.errors).unwrap_or_default(),
        ));
    }

    let response = state
        .execution
        .execute(&workflow, input, CancellationToken::new())
        .await;

    match response.status {
        crate::model::ExecutionStatus::Canceled => Err(ApiError::ClientCanceled),
        crate::model::ExecutionStatus::Failed
            if response.error.as_deref().is_some_and(|e| e.contains("timed out")) =>
        {
            Err(ApiError::Timeout(response.error.unwrap_or_default()))
        }
        _ => Ok(Json(response)),
    }
}

#[derive(Serialize)]
pub struct TestResponse {
    pub execution_plan: serde_json::Value,
}

/// No side effects: no persistence, no visualization-group event
/// emission, no task-step invocation — only the resolved DAG plan.
pub async fn test_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<serde_json::Value>,
) -> Result<Json<TestResponse>, ApiError> {
    let workflow = find_registered(&state, &name).await?;

    let validation = validate_input(&workflow, &input);
    if !validation.is_valid {
        return Err(ApiError::BadRequest(
            serde_json::to_value(&validation.errors).unwrap_or_default(),
        ));
    }

    Ok(Json(TestResponse {
        execution_plan: build_execution_plan(&workflow),
    }))
}

pub async fn list_workflow_executions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<crate::model::ExecutionRecord>>, ApiError> {
    find_registered(&state, &name).await?;
    let records = state
        .executions
        .list(Some(&name), None, page.skip, page.take)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(records))
}

async fn find_registered(
    state: &AppState,
    name: &str,
) -> Result<crate::model::WorkflowResource, ApiError> {
    if !state.endpoints.is_registered(name) {
        return Err(ApiError::NotFound(format!("unknown workflow: {name}")));
    }
    state
        .discovery
        .get_workflow_by_name(name, None)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("unknown workflow: {name}")))
}
