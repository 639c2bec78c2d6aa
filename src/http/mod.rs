//! §6 HTTP surface: fixed axum routes that consult the endpoint
//! registry and discovery cache dynamically at request time, since
//! axum has no runtime route-registration API to mirror the
//! synthesized-per-workflow endpoint model directly.
//!
//! Grounded on the teacher's `listeners/http.rs` router assembly
//! (`Router::new()` with routes added via `.route(...)`), extended
//! here with `with_state` for shared dependencies (the teacher closes
//! over its handlers instead) and a registry lookup guard ahead of
//! each workflow-scoped handler.

mod executions;
mod sse;
mod tasks;
mod versions;
mod workflows;

use crate::baseline_service::AnomalyDetector;
use crate::blast_radius::BlastRadiusIndex;
use crate::discovery::DiscoveryCache;
use crate::endpoints::EndpointRegistry;
use crate::events::EventHub;
use crate::execution::ExecutionService;
use crate::repository::{BaselineRepository, ExecutionRepository, WorkflowVersionRepository};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<DiscoveryCache>,
    pub endpoints: Arc<EndpointRegistry>,
    pub blast_radius: Arc<BlastRadiusIndex>,
    pub execution: Arc<ExecutionService>,
    pub events: Arc<EventHub>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub versions: Arc<dyn WorkflowVersionRepository>,
    pub baselines: Option<Arc<dyn BaselineRepository>>,
    pub anomaly_detector: Option<Arc<AnomalyDetector>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", get(workflows::list_workflows))
        .route(
            "/api/v1/workflows/:name",
            get(workflows::get_workflow),
        )
        .route(
            "/api/v1/workflows/:name/execute",
            axum::routing::post(workflows::execute_workflow),
        )
        .route(
            "/api/v1/workflows/:name/test",
            axum::routing::post(workflows::test_workflow),
        )
        .route(
            "/api/v1/workflows/:name/executions",
            get(workflows::list_workflow_executions),
        )
        .route(
            "/api/v1/workflows/:name/versions",
            get(versions::list_workflow_versions),
        )
        .route("/api/v1/executions/:id", get(executions::get_execution))
        .route(
            "/api/v1/executions/:id/trace",
            get(executions::get_execution_trace),
        )
        .route(
            "/api/v1/executions/:id/cancel",
            axum::routing::post(executions::cancel_execution),
        )
        .route("/api/v1/tasks", get(tasks::list_tasks))
        .route("/api/v1/events/:group", get(sse::stream_events))
        .with_state(state)
}

/// §6's fixed exit codes mapped onto a JSON error body.
pub enum ApiError {
    NotFound(String),
    BadRequest(serde_json::Value),
    Timeout(String),
    ClientCanceled,
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody { error: message, details: None },
            ),
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "input validation failed".to_string(),
                    details: Some(details),
                },
            ),
            ApiError::Timeout(message) => (
                StatusCode::REQUEST_TIMEOUT,
                ErrorBody { error: message, details: None },
            ),
            ApiError::ClientCanceled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                ErrorBody {
                    error: "Workflow execution was canceled".to_string(),
                    details: None,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody { error: message, details: None },
            ),
        };
        (status, Json(body)).into_response()
    }
}
