//! Repository contracts this core consumes (§6). The persistent store
//! itself is an external collaborator; this module defines the trait
//! surface plus two implementations — an in-memory one for tests and
//! a SQLite one (`sqlx`, as the teacher uses for its durable engine)
//! for real deployments.

pub mod mem;
pub mod sqlite;

use crate::model::{
    AnomalyEvent, Baseline, ExecutionRecord, ExecutionStatus, LabelUsageStat, TaskLabels,
    WorkflowLabels, WorkflowVersion,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("repository error: {message}"))]
    Repository { message: String },

    #[snafu(display("serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("database error: {message}"))]
    Database { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    pub workflow_name: String,
    pub total_executions: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub canceled: i64,
    pub average_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationDataPoint {
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Upsert by `id`: a second write with the same id replaces the
    /// first rather than creating a duplicate row.
    async fn save(&self, record: ExecutionRecord) -> Result<()>;
    async fn list(
        &self,
        workflow_name: Option<&str>,
        status: Option<ExecutionStatus>,
        skip: u64,
        take: u64,
    ) -> Result<Vec<ExecutionRecord>>;
    async fn get(&self, id: uuid::Uuid) -> Result<Option<ExecutionRecord>>;
    async fn get_all_workflow_statistics(&self) -> Result<HashMap<String, WorkflowStatistics>>;
    async fn get_duration_trends(
        &self,
        workflow_name: &str,
        days_back: u32,
    ) -> Result<Vec<DurationDataPoint>>;
    /// Durations in milliseconds over the rolling window, used by the
    /// baseline refresher. `task_id = None` scores the whole workflow.
    async fn recent_durations(
        &self,
        workflow_name: &str,
        task_id: Option<&str>,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<f64>>;
}

#[async_trait]
pub trait WorkflowVersionRepository: Send + Sync {
    async fn latest(&self, workflow_name: &str) -> Result<Option<WorkflowVersion>>;
    async fn append(&self, version: WorkflowVersion) -> Result<()>;
    async fn list(&self, workflow_name: &str) -> Result<Vec<WorkflowVersion>>;
}

#[async_trait]
pub trait LabelRepository: Send + Sync {
    async fn upsert_workflow_labels(&self, labels: WorkflowLabels) -> Result<()>;
    async fn upsert_task_labels(&self, labels: TaskLabels) -> Result<()>;
    /// Delete rows for entities no longer present in the given sets.
    async fn delete_missing(
        &self,
        workflows_present: &[String],
        tasks_present: &[String],
    ) -> Result<()>;
    async fn recompute_usage_stats(&self) -> Result<Vec<LabelUsageStat>>;
}

#[async_trait]
pub trait BaselineRepository: Send + Sync {
    async fn upsert(&self, baseline: Baseline) -> Result<()>;
    async fn get(&self, workflow_name: &str, task_id: Option<&str>) -> Result<Option<Baseline>>;
    async fn record_anomaly(&self, event: AnomalyEvent) -> Result<()>;
}
