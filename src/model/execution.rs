//! The execution record: the durable, owned representation of one
//! workflow run, persisted through the `Running -> terminal` lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Canceled => "Canceled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(ExecutionStatus::Running),
            "Succeeded" => Ok(ExecutionStatus::Succeeded),
            "Failed" => Ok(ExecutionStatus::Failed),
            "Canceled" => Ok(ExecutionStatus::Canceled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorType {
    HttpError,
    Timeout,
    Validation,
    Cancellation,
    Other,
}

/// Normalized, surface-visible task error enrichment (§7 of the spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    pub error_type: TaskErrorType,
    pub error_message: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub http_status_code: Option<u16>,
    #[serde(default)]
    pub response_body_preview: Option<String>,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub is_retryable: bool,
    #[serde(default)]
    pub duration_until_error_ms: i64,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub support_action: Option<String>,
    #[serde(default)]
    pub response_compliance: Option<String>,
    #[serde(default)]
    pub response_compliance_score: Option<f64>,
    #[serde(default)]
    pub response_compliance_issues: Vec<String>,
    #[serde(default)]
    pub response_compliance_recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub task_id: String,
    pub task_ref: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: TaskStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub resolved_url: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub output_preview: Option<String>,
    #[serde(default)]
    pub error_info: Option<TaskErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_name: String,
    pub namespace: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub input_snapshot: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub tasks: Vec<TaskExecutionRecord>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn new_running(
        id: Uuid,
        workflow_name: String,
        namespace: String,
        input_snapshot: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            workflow_name,
            namespace,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            duration_ms: None,
            input_snapshot,
            output: None,
            error: None,
            tasks: Vec::new(),
        }
    }
}

/// A single field-level validation failure (§6/§7, `ValidationResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

/// Response mirroring a persisted execution plus derived fields (§4.3
/// step 9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub id: Uuid,
    pub workflow_name: String,
    pub namespace: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub tasks: Vec<TaskExecutionRecord>,
    pub execution_time_ms: i64,
    pub executed_tasks: Vec<String>,
    pub orchestration_cost_micros: Option<u64>,
    pub graph_diagnostics: Option<serde_json::Value>,
}

/// Per-task wait time and parallel-group breakdown, computed on demand
/// for `GET /api/v1/executions/{id}/trace` (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub execution_id: Uuid,
    pub task_wait_times_ms: std::collections::BTreeMap<String, i64>,
    pub parallel_groups: Vec<Vec<String>>,
}
