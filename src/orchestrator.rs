//! The inner orchestrator contract (§4.3) and a reference
//! implementation: a `petgraph`-built DAG walked with bounded
//! concurrency via a `tokio::sync::Semaphore`, grounded on the
//! teacher's `durableengine/graph.rs` node/edge construction style.
//!
//! The task-step executor itself — the HTTP call out to a task's
//! backing service — is an explicit external collaborator per the
//! spec; [`TaskStepExecutor`] is this core's contract with it, and
//! [`ReqwestTaskStepExecutor`] is the reference implementation the
//! default orchestrator is wired to.

use crate::model::{TaskErrorInfo, TaskErrorType, TaskStep, WorkflowResource, WorkflowTaskResource};
use async_trait::async_trait;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub task_ref: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error_info: Option<TaskErrorInfo>,
    pub retry_count: u32,
    pub resolved_url: Option<String>,
    pub http_method: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowExecutionResult {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub errors: Vec<String>,
    pub task_results: HashMap<String, TaskExecutionResult>,
    pub orchestration_cost_micros: Option<u64>,
    pub graph_diagnostics: Option<serde_json::Value>,
    pub graph_build_duration: Option<Duration>,
}

#[async_trait]
pub trait WorkflowOrchestrator: Send + Sync {
    async fn execute(
        &self,
        workflow: &WorkflowResource,
        tasks: &HashMap<String, WorkflowTaskResource>,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> WorkflowExecutionResult;
}

/// Outcome of a single task-step invocation, as returned by the
/// pluggable [`TaskStepExecutor`].
#[derive(Debug, Clone)]
pub struct TaskStepOutcome {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error_info: Option<TaskErrorInfo>,
    pub resolved_url: Option<String>,
    pub http_method: Option<String>,
    pub retry_count: u32,
}

#[async_trait]
pub trait TaskStepExecutor: Send + Sync {
    async fn execute_task(
        &self,
        task_ref: &str,
        task_resource: Option<&WorkflowTaskResource>,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> TaskStepOutcome;
}

/// Reference task-step executor: resolves a backing HTTP endpoint from
/// the task resource's `serviceUrl` annotation and invokes it with the
/// resolved input as a JSON POST body.
pub struct ReqwestTaskStepExecutor {
    client: reqwest::Client,
}

impl ReqwestTaskStepExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTaskStepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStepExecutor for ReqwestTaskStepExecutor {
    async fn execute_task(
        &self,
        task_ref: &str,
        task_resource: Option<&WorkflowTaskResource>,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> TaskStepOutcome {
        let Some(task_resource) = task_resource else {
            return TaskStepOutcome {
                success: false,
                output: None,
                error_info: Some(TaskErrorInfo {
                    task_id: None,
                    task_name: None,
                    error_type: TaskErrorType::Validation,
                    error_message: format!("unknown task reference: {task_ref}"),
                    error_code: Some("UNKNOWN_TASK_REF".to_string()),
                    service_name: None,
                    service_url: None,
                    http_method: None,
                    http_status_code: None,
                    response_body_preview: None,
                    retry_attempts: 0,
                    is_retryable: false,
                    duration_until_error_ms: 0,
                    suggestion: Some(format!("register a WorkflowTaskResource named {task_ref}")),
                    support_action: None,
                    response_compliance: None,
                    response_compliance_score: None,
                    response_compliance_issues: Vec::new(),
                    response_compliance_recommendations: Vec::new(),
                }),
                resolved_url: None,
                http_method: None,
                retry_count: 0,
            };
        };

        let Some(url) = task_resource.metadata.annotations.get("serviceUrl").cloned() else {
            return TaskStepOutcome {
                success: false,
                output: None,
                error_info: Some(TaskErrorInfo {
                    task_id: None,
                    task_name: Some(task_resource.name()),
                    error_type: TaskErrorType::Validation,
                    error_message: format!("task {task_ref} has no serviceUrl annotation"),
                    error_code: Some("MISSING_SERVICE_URL".to_string()),
                    service_name: Some(task_resource.name()),
                    service_url: None,
                    http_method: None,
                    http_status_code: None,
                    response_body_preview: None,
                    retry_attempts: 0,
                    is_retryable: false,
                    duration_until_error_ms: 0,
                    suggestion: Some("set annotations.serviceUrl on the task resource".to_string()),
                    support_action: None,
                    response_compliance: None,
                    response_compliance_score: None,
                    response_compliance_issues: Vec::new(),
                    response_compliance_recommendations: Vec::new(),
                }),
                resolved_url: None,
                http_method: None,
                retry_count: 0,
            };
        };

        let started = Instant::now();
        let request = self.client.post(&url).json(&input).send();
        let response = tokio::select! {
            result = request => result,
            () = cancellation.cancelled() => {
                return TaskStepOutcome {
                    success: false,
                    output: None,
                    error_info: Some(TaskErrorInfo {
                        task_id: None,
                        task_name: Some(task_resource.name()),
                        error_type: TaskErrorType::Cancellation,
                        error_message: "task step was canceled".to_string(),
                        error_code: None,
                        service_name: Some(task_resource.name()),
                        service_url: Some(url.clone()),
                        http_method: Some("POST".to_string()),
                        http_status_code: None,
                        response_body_preview: None,
                        retry_attempts: 0,
                        is_retryable: false,
                        duration_until_error_ms: started.elapsed().as_millis() as i64,
                        suggestion: None,
                        support_action: None,
                        response_compliance: None,
                        response_compliance_score: None,
                        response_compliance_issues: Vec::new(),
                        response_compliance_recommendations: Vec::new(),
                    }),
                    resolved_url: Some(url),
                    http_method: Some("POST".to_string()),
                    retry_count: 0,
                };
            }
        };

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let output = resp.json::<serde_json::Value>().await.ok();
                    TaskStepOutcome {
                        success: true,
                        output,
                        error_info: None,
                        resolved_url: Some(url),
                        http_method: Some("POST".to_string()),
                        retry_count: 0,
                    }
                } else {
                    let body_preview = resp.text().await.unwrap_or_default();
                    let preview: String = body_preview.chars().take(500).collect();
                    TaskStepOutcome {
                        success: false,
                        output: None,
                        error_info: Some(TaskErrorInfo {
                            task_id: None,
                            task_name: Some(task_resource.name()),
                            error_type: TaskErrorType::HttpError,
                            error_message: format!("task service responded with status {status}"),
                            error_code: Some(status.as_u16().to_string()),
                            service_name: Some(task_resource.name()),
                            service_url: Some(url.clone()),
                            http_method: Some("POST".to_string()),
                            http_status_code: Some(status.as_u16()),
                            response_body_preview: Some(preview),
                            retry_attempts: 0,
                            is_retryable: status.is_server_error(),
                            duration_until_error_ms: started.elapsed().as_millis() as i64,
                            suggestion: None,
                            support_action: None,
                            response_compliance: None,
                            response_compliance_score: None,
                            response_compliance_issues: Vec::new(),
                            response_compliance_recommendations: Vec::new(),
                        }),
                        resolved_url: Some(url),
                        http_method: Some("POST".to_string()),
                        retry_count: 0,
                    }
                }
            }
            Err(source) => {
                let error_type = if source.is_timeout() {
                    TaskErrorType::Timeout
                } else {
                    TaskErrorType::HttpError
                };
                TaskStepOutcome {
                    success: false,
                    output: None,
                    error_info: Some(TaskErrorInfo {
                        task_id: None,
                        task_name: Some(task_resource.name()),
                        error_type,
                        error_message: source.to_string(),
                        error_code: None,
                        service_name: Some(task_resource.name()),
                        service_url: Some(url.clone()),
                        http_method: Some("POST".to_string()),
                        http_status_code: source.status().map(|s| s.as_u16()),
                        response_body_preview: None,
                        retry_attempts: 0,
                        is_retryable: true,
                        duration_until_error_ms: started.elapsed().as_millis() as i64,
                        suggestion: None,
                        support_action: None,
                        response_compliance: None,
                        response_compliance_score: None,
                        response_compliance_issues: Vec::new(),
                        response_compliance_recommendations: Vec::new(),
                    }),
                    resolved_url: Some(url),
                    http_method: Some("POST".to_string()),
                    retry_count: 0,
                }
            }
        }
    }
}

/// Resolves the task DAG's topological batches without invoking any
/// task step — the side-effect-free plan returned by `POST
/// /api/v1/workflows/{name}/test`.
#[must_use]
pub fn build_execution_plan(workflow: &WorkflowResource) -> serde_json::Value {
    let (graph, nodes) = DefaultOrchestrator::build_graph(&workflow.spec.tasks);
    let mut remaining_deps: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in graph.node_indices() {
        remaining_deps.insert(
            idx,
            graph.neighbors_directed(idx, petgraph::Direction::Incoming).count(),
        );
    }

    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut done = std::collections::HashSet::new();
    while done.len() < nodes.len() {
        let ready: Vec<NodeIndex> = remaining_deps
            .iter()
            .filter(|&(idx, &deps)| deps == 0 && !done.contains(idx))
            .map(|(idx, _)| *idx)
            .collect();
        if ready.is_empty() {
            break;
        }
        for &idx in &ready {
            done.insert(idx);
            for dependent in graph.neighbors_directed(idx, petgraph::Direction::Outgoing) {
                if let Some(count) = remaining_deps.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        batches.push(ready.into_iter().map(|idx| graph[idx].clone()).collect());
    }

    serde_json::json!({
        "nodeCount": graph.node_count(),
        "edgeCount": graph.edge_count(),
        "batches": batches,
    })
}

/// `petgraph`-backed DAG executor bounded by a per-execution
/// `Semaphore`, dispatching each ready task to the configured
/// [`TaskStepExecutor`].
pub struct DefaultOrchestrator {
    executor: Arc<dyn TaskStepExecutor>,
    concurrency: usize,
}

impl DefaultOrchestrator {
    #[must_use]
    pub fn new(executor: Arc<dyn TaskStepExecutor>, concurrency: usize) -> Self {
        Self {
            executor,
            concurrency: concurrency.max(1),
        }
    }

    fn build_graph(tasks: &[TaskStep]) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for task in tasks {
            let idx = graph.add_node(task.id.clone());
            nodes.insert(task.id.clone(), idx);
        }
        for task in tasks {
            let Some(&dst) = nodes.get(task.id.as_str()) else {
                continue;
            };
            for dep in &task.depends_on {
                if let Some(&src) = nodes.get(dep.as_str()) {
                    graph.add_edge(src, dst, ());
                }
            }
        }
        (graph, nodes)
    }
}

#[async_trait]
impl WorkflowOrchestrator for DefaultOrchestrator {
    async fn execute(
        &self,
        workflow: &WorkflowResource,
        tasks: &HashMap<String, WorkflowTaskResource>,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> WorkflowExecutionResult {
        let build_started = Instant::now();
        let (graph, nodes) = Self::build_graph(&workflow.spec.tasks);
        let graph_build_duration = build_started.elapsed();

        let graph_diagnostics = serde_json::json!({
            "nodeCount": graph.node_count(),
            "edgeCount": graph.edge_count(),
        });

        let steps_by_id: HashMap<&str, &TaskStep> =
            workflow.spec.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut remaining_deps: HashMap<NodeIndex, usize> = HashMap::new();
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for idx in graph.node_indices() {
            let incoming = graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .count();
            remaining_deps.insert(idx, incoming);
            for dep_idx in graph.neighbors_directed(idx, petgraph::Direction::Incoming) {
                dependents.entry(dep_idx).or_default().push(idx);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut ready: Vec<NodeIndex> = remaining_deps
            .iter()
            .filter(|&(_, &deps)| deps == 0)
            .map(|(idx, _)| *idx)
            .collect();

        let mut in_flight = tokio::task::JoinSet::new();
        let mut task_results: HashMap<String, TaskExecutionResult> = HashMap::new();
        let mut errors = Vec::new();
        let mut canceled = false;

        let mut spawned = std::collections::HashSet::new();
        loop {
            if cancellation.is_cancelled() {
                canceled = true;
            }

            while !canceled {
                let Some(idx) = ready.pop() else { break };
                if !spawned.insert(idx) {
                    continue;
                }
                let task_id = graph[idx].clone();
                let Some(&step) = steps_by_id.get(task_id.as_str()) else {
                    continue;
                };
                let step = step.clone();
                let task_resource = tasks.get(&step.task_ref).cloned();
                let executor = self.executor.clone();
                let semaphore = semaphore.clone();
                let cancellation = cancellation.clone();
                let input = serde_json::to_value(&step.input).unwrap_or_default();

                in_flight.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let started_at = chrono::Utc::now();
                    let outcome = executor
                        .execute_task(&step.task_ref, task_resource.as_ref(), input, cancellation)
                        .await;
                    let completed_at = chrono::Utc::now();
                    let duration_ms = (completed_at - started_at).num_milliseconds();
                    (
                        idx,
                        TaskExecutionResult {
                            task_id: step.id.clone(),
                            task_ref: step.task_ref.clone(),
                            started_at,
                            completed_at,
                            duration_ms,
                            success: outcome.success,
                            output: outcome.output,
                            error_info: outcome.error_info,
                            retry_count: outcome.retry_count,
                            resolved_url: outcome.resolved_url,
                            http_method: outcome.http_method,
                        },
                    )
                });
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let Ok((idx, mut result)) = joined else {
                continue;
            };

            if let Some(deps) = dependents.get(&idx) {
                for &dep in deps {
                    if let Some(count) = remaining_deps.get_mut(&dep) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            ready.push(dep);
                        }
                    }
                }
            }

            if let Some(error_info) = result.error_info.as_mut() {
                if error_info.task_id.is_none() {
                    error_info.task_id = Some(result.task_id.clone());
                }
                if error_info.task_name.is_none() {
                    error_info.task_name = Some(result.task_ref.clone());
                }
                errors.push(error_info.error_message.clone());
            }

            task_results.insert(result.task_id.clone(), result);
        }

        let success = !canceled && errors.is_empty() && task_results.values().all(|r| r.success);

        WorkflowExecutionResult {
            success,
            output: None,
            errors,
            task_results,
            orchestration_cost_micros: Some(graph_build_duration.as_micros() as u64),
            graph_diagnostics: Some(graph_diagnostics),
            graph_build_duration: Some(graph_build_duration),
        }
    }
}
