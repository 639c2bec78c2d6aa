//! §4.3 Execution Engine & Persistence — runs a [`WorkflowResource`]
//! against its task graph with a timeout, records the full
//! `Running -> terminal` lifecycle, and derives the response the HTTP
//! surface returns.

use crate::baseline_service::AnomalyDetector;
use crate::discovery::DiscoveryCache;
use crate::events::{EventHub, WorkflowEvent};
use crate::model::{
    ExecutionRecord, ExecutionResponse, ExecutionStatus, ExecutionTrace, TaskExecutionRecord,
    TaskStatus, ValidationError, ValidationResult, WorkflowResource, WorkflowTaskResource,
};
use crate::orchestrator::WorkflowOrchestrator;
use crate::repository::ExecutionRepository;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Best-effort extraction of a panic payload's message, for the
/// "Orchestrator exception" error policy.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow not found: {name}"))]
    WorkflowNotFound { name: String },

    #[snafu(display("execution not found: {id}"))]
    ExecutionNotFound { id: Uuid },

    #[snafu(display("discovery error: {source}"))]
    Discovery { source: crate::discovery::Error },

    #[snafu(display("repository error: {source}"))]
    Repository { source: crate::repository::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validate `input` against the workflow's declared input schema. Per
/// the testable property in §8, an empty schema with empty input is
/// valid without ever consulting a schema validator.
#[must_use]
pub fn validate_input(workflow: &WorkflowResource, input: &serde_json::Value) -> ValidationResult {
    if workflow.spec.input.is_empty() {
        return ValidationResult::ok();
    }

    let input_obj = input.as_object();
    let mut errors = Vec::new();
    for (name, param) in &workflow.spec.input {
        let provided = input_obj.and_then(|o| o.get(name));
        if param.required && provided.is_none() && param.default_value.is_none() {
            errors.push(ValidationError {
                field: name.clone(),
                message: "required input field is missing".to_string(),
            });
        }
    }

    if errors.is_empty() {
        ValidationResult::ok()
    } else {
        ValidationResult::failed(errors)
    }
}

enum Outcome {
    Completed(crate::orchestrator::WorkflowExecutionResult),
    TimedOut,
    Canceled,
    OrchestratorPanicked(String),
}

pub struct ExecutionService {
    discovery: Arc<DiscoveryCache>,
    orchestrator: Arc<dyn WorkflowOrchestrator>,
    executions: Option<Arc<dyn ExecutionRepository>>,
    events: Arc<EventHub>,
    timeout: Duration,
    anomaly: Option<Arc<AnomalyDetector>>,
    /// Cancellation tokens for executions currently in flight, keyed by
    /// execution id. Populated the moment an id is minted (before the
    /// `WorkflowStarted` event is published, so a subscriber that reacts
    /// to that event can always find the entry) and removed once the
    /// run reaches a terminal state. Lets `cancel` reach a run from
    /// outside the request that started it — the only way a caller
    /// blocked on the synchronous `execute` HTTP handler can ever be
    /// canceled by someone else.
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl ExecutionService {
    #[must_use]
    pub fn new(
        discovery: Arc<DiscoveryCache>,
        orchestrator: Arc<dyn WorkflowOrchestrator>,
        executions: Option<Arc<dyn ExecutionRepository>>,
        events: Arc<EventHub>,
        timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            orchestrator,
            executions,
            events,
            timeout,
            anomaly: None,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Cancels an in-flight execution by id. Returns `false` if no
    /// execution with that id is currently running (already terminal,
    /// or never existed).
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.active.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Attaches the anomaly detector consulted after every completed
    /// execution. Builder-style so tests can omit it entirely.
    #[must_use]
    pub fn with_anomaly_detector(mut self, detector: Arc<AnomalyDetector>) -> Self {
        self.anomaly = Some(detector);
        self
    }

    /// Scores the whole-workflow duration and every task's duration
    /// against their baselines. Only called for terminal, non-canceled
    /// executions — a timed-out or canceled run has no steady-state
    /// duration worth comparing.
    async fn evaluate_anomalies(
        &self,
        execution_id: Uuid,
        workflow_name: &str,
        duration_ms: i64,
        tasks: &[TaskExecutionRecord],
    ) {
        let Some(detector) = &self.anomaly else {
            return;
        };
        detector
            .evaluate(workflow_name, None, duration_ms as f64, execution_id)
            .await;
        for task in tasks {
            if let Some(task_duration) = task.duration_ms {
                detector
                    .evaluate(workflow_name, Some(&task.task_id), task_duration as f64, execution_id)
                    .await;
            }
        }
    }

    async fn task_map(&self, namespace: &str) -> HashMap<String, WorkflowTaskResource> {
        let tasks = self
            .discovery
            .discover_tasks(Some(namespace))
            .await
            .unwrap_or_default();
        // Tasks with missing metadata.name map under the empty string,
        // preserving the source's lenient (if questionable) behavior.
        tasks
            .into_iter()
            .map(|t| (t.metadata.name.clone().unwrap_or_default(), t))
            .collect()
    }

    async fn persist(&self, record: ExecutionRecord) {
        if let Some(repo) = &self.executions {
            if let Err(err) = repo.save(record).await {
                tracing::warn!(error = %err, "failed to persist execution record");
            }
        }
    }

    /// §4.3 steps 1-9, run synchronously to completion.
    pub async fn execute(
        &self,
        workflow: &WorkflowResource,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> ExecutionResponse {
        let id = Uuid::new_v4();
        self.active.insert(id, cancellation.clone());
        let workflow_name = workflow.name();
        let namespace = workflow.namespace();
        let started_at = Utc::now();

        let record = ExecutionRecord::new_running(
            id,
            workflow_name.clone(),
            namespace.clone(),
            input.clone(),
            started_at,
        );
        self.persist(record).await;
        self.events.publish(WorkflowEvent::WorkflowStarted {
            execution_id: id,
            timestamp: Utc::now(),
            workflow_name: workflow_name.clone(),
        });

        let task_map = self.task_map(&namespace).await;

        let orchestrator_run = std::panic::AssertUnwindSafe(
            self.orchestrator
                .execute(workflow, &task_map, input.clone(), cancellation.clone()),
        )
        .catch_unwind();

        let outcome = tokio::select! {
            result = orchestrator_run => match result {
                Ok(result) => Outcome::Completed(result),
                Err(panic) => Outcome::OrchestratorPanicked(panic_message(panic)),
            },
            () = cancellation.cancelled() => Outcome::Canceled,
            () = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
        };

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds();

        let (status, error, tasks, orchestration_cost_micros, graph_diagnostics, output) = match outcome {
            Outcome::Completed(result) => {
                let status = if result.success {
                    ExecutionStatus::Succeeded
                } else {
                    ExecutionStatus::Failed
                };
                let error = if result.errors.is_empty() {
                    None
                } else {
                    Some(result.errors.join("; "))
                };
                let mut task_records: Vec<TaskExecutionRecord> = result
                    .task_results
                    .into_values()
                    .map(|t| TaskExecutionRecord {
                        task_id: t.task_id,
                        task_ref: t.task_ref,
                        started_at: t.started_at,
                        completed_at: Some(t.completed_at),
                        duration_ms: Some(t.duration_ms),
                        status: if t.success {
                            TaskStatus::Succeeded
                        } else {
                            TaskStatus::Failed
                        },
                        retry_count: t.retry_count,
                        resolved_url: t.resolved_url,
                        http_method: t.http_method,
                        output_preview: t.output.as_ref().map(|o| o.to_string()),
                        error_info: t.error_info,
                    })
                    .collect();
                task_records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
                (
                    status,
                    error,
                    task_records,
                    result.orchestration_cost_micros,
                    result.graph_diagnostics,
                    result.output,
                )
            }
            Outcome::TimedOut => (
                ExecutionStatus::Failed,
                Some(format!("execution timed out after {:?}", self.timeout)),
                Vec::new(),
                None,
                None,
                None,
            ),
            Outcome::Canceled => (
                ExecutionStatus::Canceled,
                Some("Workflow execution was canceled".to_string()),
                Vec::new(),
                None,
                None,
                None,
            ),
            Outcome::OrchestratorPanicked(message) => (
                ExecutionStatus::Failed,
                Some(format!("Unexpected error during workflow execution: {message}")),
                Vec::new(),
                None,
                None,
                None,
            ),
        };

        let executed_tasks: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();

        let final_record = ExecutionRecord {
            id,
            workflow_name: workflow_name.clone(),
            namespace: namespace.clone(),
            status,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some(duration_ms),
            input_snapshot: input,
            output: output.clone(),
            error: error.clone(),
            tasks: tasks.clone(),
        };
        self.persist(final_record).await;
        self.active.remove(&id);

        self.events.publish(WorkflowEvent::WorkflowCompleted {
            execution_id: id,
            timestamp: Utc::now(),
            workflow_name: workflow_name.clone(),
            status: status.as_str().to_string(),
            output: output.clone(),
            duration_ms,
        });

        if status == ExecutionStatus::Succeeded || status == ExecutionStatus::Failed {
            self.evaluate_anomalies(id, &workflow_name, duration_ms, &tasks).await;
        }

        ExecutionResponse {
            id,
            workflow_name: workflow.name(),
            namespace,
            status,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some(duration_ms),
            output,
            error,
            tasks,
            execution_time_ms: duration_ms,
            executed_tasks,
            orchestration_cost_micros,
            graph_diagnostics,
        }
    }

    /// Looks up `name` via discovery and runs [`Self::execute`] in the
    /// background, returning as soon as the initial `Running` record
    /// exists.
    pub async fn start_execution(
        &self,
        name: &str,
        namespace: Option<&str>,
        input: serde_json::Value,
    ) -> Result<Uuid> {
        let workflow = self
            .discovery
            .get_workflow_by_name(name, namespace)
            .await
            .context(DiscoverySnafu)?
            .context(WorkflowNotFoundSnafu { name })?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let record = ExecutionRecord::new_running(
            id,
            workflow.name(),
            workflow.namespace(),
            input.clone(),
            started_at,
        );
        if let Some(repo) = &self.executions {
            repo.save(record).await.context(RepositorySnafu)?;
        }

        // The remainder of §4.3 (steps 3-9) happens independent of the
        // caller; `execute` would persist a second `Running` record if
        // called directly, so the background continuation below
        // re-derives the same pipeline inline rather than calling it.
        let this = self.clone_handles();
        tokio::spawn(async move {
            this.continue_execution(id, workflow, input, started_at).await;
        });

        Ok(id)
    }

    fn clone_handles(&self) -> ExecutionService {
        ExecutionService {
            discovery: self.discovery.clone(),
            orchestrator: self.orchestrator.clone(),
            executions: self.executions.clone(),
            events: self.events.clone(),
            timeout: self.timeout,
            anomaly: self.anomaly.clone(),
            active: self.active.clone(),
        }
    }

    async fn continue_execution(
        &self,
        id: Uuid,
        workflow: WorkflowResource,
        input: serde_json::Value,
        started_at: chrono::DateTime<Utc>,
    ) {
        let workflow_name = workflow.name();
        let namespace = workflow.namespace();
        self.events.publish(WorkflowEvent::WorkflowStarted {
            execution_id: id,
            timestamp: Utc::now(),
            workflow_name: workflow_name.clone(),
        });

        let task_map = self.task_map(&namespace).await;
        let cancellation = CancellationToken::new();
        self.active.insert(id, cancellation.clone());
        let orchestrator_run = std::panic::AssertUnwindSafe(
            self.orchestrator
                .execute(&workflow, &task_map, input.clone(), cancellation.clone()),
        )
        .catch_unwind();
        let outcome = tokio::select! {
            result = orchestrator_run => match result {
                Ok(result) => Outcome::Completed(result),
                Err(panic) => Outcome::OrchestratorPanicked(panic_message(panic)),
            },
            () = cancellation.cancelled() => Outcome::Canceled,
            () = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
        };

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds();

        let (status, error, tasks, output) = match outcome {
            Outcome::Completed(result) => {
                let status = if result.success {
                    ExecutionStatus::Succeeded
                } else {
                    ExecutionStatus::Failed
                };
                let error = if result.errors.is_empty() {
                    None
                } else {
                    Some(result.errors.join("; "))
                };
                let task_records: Vec<TaskExecutionRecord> = result
                    .task_results
                    .into_values()
                    .map(|t| TaskExecutionRecord {
                        task_id: t.task_id,
                        task_ref: t.task_ref,
                        started_at: t.started_at,
                        completed_at: Some(t.completed_at),
                        duration_ms: Some(t.duration_ms),
                        status: if t.success {
                            TaskStatus::Succeeded
                        } else {
                            TaskStatus::Failed
                        },
                        retry_count: t.retry_count,
                        resolved_url: t.resolved_url,
                        http_method: t.http_method,
                        output_preview: t.output.as_ref().map(|o| o.to_string()),
                        error_info: t.error_info,
                    })
                    .collect();
                (status, error, task_records, result.output)
            }
            Outcome::TimedOut => (
                ExecutionStatus::Failed,
                Some(format!("execution timed out after {:?}", self.timeout)),
                Vec::new(),
                None,
            ),
            Outcome::Canceled => (
                ExecutionStatus::Canceled,
                Some("Workflow execution was canceled".to_string()),
                Vec::new(),
                None,
            ),
            Outcome::OrchestratorPanicked(message) => (
                ExecutionStatus::Failed,
                Some(format!("Unexpected error during workflow execution: {message}")),
                Vec::new(),
                None,
            ),
        };

        let final_record = ExecutionRecord {
            id,
            workflow_name: workflow_name.clone(),
            namespace,
            status,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some(duration_ms),
            input_snapshot: input,
            output: output.clone(),
            error,
            tasks: tasks.clone(),
        };
        self.persist(final_record).await;
        self.active.remove(&id);

        self.events.publish(WorkflowEvent::WorkflowCompleted {
            execution_id: id,
            timestamp: Utc::now(),
            workflow_name: workflow_name.clone(),
            status: status.as_str().to_string(),
            output,
            duration_ms,
        });

        if status == ExecutionStatus::Succeeded || status == ExecutionStatus::Failed {
            self.evaluate_anomalies(id, &workflow_name, duration_ms, &tasks).await;
        }
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        match &self.executions {
            Some(repo) => repo.get(id).await.context(RepositorySnafu),
            None => Ok(None),
        }
    }

    pub async fn trace(&self, id: Uuid) -> Result<Option<ExecutionTrace>> {
        let Some(record) = self.get_execution(id).await? else {
            return Ok(None);
        };
        Ok(Some(build_trace(id, &record)))
    }
}

impl Clone for ExecutionService {
    fn clone(&self) -> Self {
        self.clone_handles()
    }
}

/// Per §4.3's trace contract: `waitTimeMs` per task is its start minus
/// the latest completion among its declared dependencies (0 with no
/// dependencies); `parallelGroups` clusters tasks whose `[started,
/// completed]` intervals overlap.
fn build_trace(execution_id: Uuid, record: &ExecutionRecord) -> ExecutionTrace {
    let by_id: HashMap<&str, &TaskExecutionRecord> =
        record.tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();

    // dependsOn information isn't carried on TaskExecutionRecord, so
    // wait time is derived purely from observed start/finish overlap:
    // a task's wait time is its start minus the latest completion
    // among tasks that finished before it started.
    let mut wait_times: BTreeMap<String, i64> = BTreeMap::new();
    for task in &record.tasks {
        let latest_prior_completion = record
            .tasks
            .iter()
            .filter(|other| other.task_id != task.task_id)
            .filter_map(|other| other.completed_at)
            .filter(|&c| c <= task.started_at)
            .max();
        let wait_ms = latest_prior_completion
            .map(|c| (task.started_at - c).num_milliseconds().max(0))
            .unwrap_or(0);
        wait_times.insert(task.task_id.clone(), wait_ms);
    }

    let mut groups: Vec<Vec<String>> = Vec::new();
    for task in &record.tasks {
        let Some(completed) = task.completed_at else {
            continue;
        };
        let mut placed = false;
        for group in &mut groups {
            let overlaps = group.iter().any(|member_id| {
                by_id
                    .get(member_id.as_str())
                    .and_then(|m| m.completed_at.map(|mc| (m.started_at, mc)))
                    .is_some_and(|(ms, mc)| task.started_at <= mc && ms <= completed)
            });
            if overlaps {
                group.push(task.task_id.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            groups.push(vec![task.task_id.clone()]);
        }
    }

    ExecutionTrace {
        execution_id,
        task_wait_times_ms: wait_times,
        parallel_groups: groups.into_iter().filter(|g| g.len() > 1).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputParameter, ResourceMetadata, TaskErrorType, WorkflowSpec};

    fn task_record(id: &str, start_ms: i64, end_ms: i64) -> TaskExecutionRecord {
        let base = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        TaskExecutionRecord {
            task_id: id.to_string(),
            task_ref: id.to_string(),
            started_at: base + chrono::Duration::milliseconds(start_ms),
            completed_at: Some(base + chrono::Duration::milliseconds(end_ms)),
            duration_ms: Some(end_ms - start_ms),
            status: TaskStatus::Succeeded,
            retry_count: 0,
            resolved_url: None,
            http_method: None,
            output_preview: None,
            error_info: None,
        }
    }

    #[test]
    fn parallel_wait_time_matches_scenario_2() {
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            workflow_name: "w".to_string(),
            namespace: "default".to_string(),
            status: ExecutionStatus::Succeeded,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms: Some(300),
            input_snapshot: serde_json::json!({}),
            output: None,
            error: None,
            tasks: vec![
                task_record("t1", 0, 100),
                task_record("t2", 0, 200),
                task_record("t3", 250, 300),
            ],
        };
        let trace = build_trace(record.id, &record);
        assert_eq!(trace.task_wait_times_ms["t3"], 50);
        assert!(trace
            .parallel_groups
            .iter()
            .any(|g| g.contains(&"t1".to_string()) && g.contains(&"t2".to_string())));
    }

    #[test]
    fn empty_schema_and_input_is_valid_without_errors() {
        let workflow = WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("w".to_string()),
                ..Default::default()
            },
            spec: WorkflowSpec::default(),
        };
        let result = validate_input(&workflow, &serde_json::json!({}));
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn missing_required_field_without_default_is_invalid() {
        let mut spec = WorkflowSpec::default();
        spec.input.insert(
            "name".to_string(),
            InputParameter {
                param_type: Some("string".to_string()),
                required: true,
                description: None,
                default_value: None,
            },
        );
        let workflow = WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("w".to_string()),
                ..Default::default()
            },
            spec,
        };
        let result = validate_input(&workflow, &serde_json::json!({}));
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].field, "name");
    }

    #[test]
    fn task_error_type_variants_are_distinguishable() {
        assert_ne!(TaskErrorType::Timeout, TaskErrorType::HttpError);
    }
}
