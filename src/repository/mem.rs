//! In-memory repository implementations, grounded on the teacher's
//! `InMemoryPersistence` (mutex-guarded `HashMap`s, `PoisonError`
//! recovery via `into_inner`).

use super::{
    BaselineRepository, DurationDataPoint, Error, ExecutionRepository, LabelRepository, Result,
    WorkflowStatistics, WorkflowVersionRepository,
};
use crate::model::{
    AnomalyEvent, Baseline, ExecutionRecord, ExecutionStatus, LabelUsageStat, TaskLabels,
    WorkflowLabels, WorkflowVersion,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    records: Mutex<HashMap<Uuid, ExecutionRecord>>,
}

impl InMemoryExecutionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, record: ExecutionRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        records.insert(record.id, record);
        Ok(())
    }

    async fn list(
        &self,
        workflow_name: Option<&str>,
        status: Option<ExecutionStatus>,
        skip: u64,
        take: u64,
    ) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut matching: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| workflow_name.is_none_or(|n| r.workflow_name == n))
            .filter(|r| status.is_none_or(|s| r.status as u8 == s as u8))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.started_at);
        Ok(matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(records.get(&id).cloned())
    }

    async fn get_all_workflow_statistics(&self) -> Result<HashMap<String, WorkflowStatistics>> {
        let records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stats: HashMap<String, WorkflowStatistics> = HashMap::new();
        for record in records.values() {
            let entry = stats
                .entry(record.workflow_name.clone())
                .or_insert_with(|| WorkflowStatistics {
                    workflow_name: record.workflow_name.clone(),
                    total_executions: 0,
                    succeeded: 0,
                    failed: 0,
                    canceled: 0,
                    average_duration_ms: None,
                });
            entry.total_executions += 1;
            match record.status {
                ExecutionStatus::Succeeded => entry.succeeded += 1,
                ExecutionStatus::Failed => entry.failed += 1,
                ExecutionStatus::Canceled => entry.canceled += 1,
                ExecutionStatus::Running => {}
            }
        }
        for (name, stat) in stats.iter_mut() {
            let durations: Vec<f64> = records
                .values()
                .filter(|r| &r.workflow_name == name)
                .filter_map(|r| r.duration_ms)
                .map(|d| d as f64)
                .collect();
            if !durations.is_empty() {
                stat.average_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
            }
        }
        Ok(stats)
    }

    async fn get_duration_trends(
        &self,
        workflow_name: &str,
        days_back: u32,
    ) -> Result<Vec<DurationDataPoint>> {
        let records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days_back));
        let mut points: Vec<DurationDataPoint> = records
            .values()
            .filter(|r| r.workflow_name == workflow_name && r.started_at >= cutoff)
            .filter_map(|r| {
                r.duration_ms.map(|d| DurationDataPoint {
                    executed_at: r.started_at,
                    duration_ms: d,
                })
            })
            .collect();
        points.sort_by_key(|p| p.executed_at);
        Ok(points)
    }

    async fn recent_durations(
        &self,
        workflow_name: &str,
        task_id: Option<&str>,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<f64>> {
        let records = self.records.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut durations = Vec::new();
        for record in records.values() {
            if record.workflow_name != workflow_name || record.started_at < since {
                continue;
            }
            match task_id {
                None => {
                    if let Some(d) = record.duration_ms {
                        durations.push(d as f64);
                    }
                }
                Some(task_id) => {
                    for task in &record.tasks {
                        if task.task_id == task_id {
                            if let Some(d) = task.duration_ms {
                                durations.push(d as f64);
                            }
                        }
                    }
                }
            }
        }
        Ok(durations)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVersionRepository {
    versions: Mutex<HashMap<String, Vec<WorkflowVersion>>>,
}

impl InMemoryVersionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowVersionRepository for InMemoryVersionRepository {
    async fn latest(&self, workflow_name: &str) -> Result<Option<WorkflowVersion>> {
        let versions = self.versions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(versions
            .get(workflow_name)
            .and_then(|v| v.iter().max_by_key(|v| v.revision).cloned()))
    }

    async fn append(&self, version: WorkflowVersion) -> Result<()> {
        let mut versions = self.versions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        versions.entry(version.workflow_name.clone()).or_default().push(version);
        Ok(())
    }

    async fn list(&self, workflow_name: &str) -> Result<Vec<WorkflowVersion>> {
        let versions = self.versions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut list = versions.get(workflow_name).cloned().unwrap_or_default();
        list.sort_by_key(|v| v.revision);
        Ok(list)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLabelRepository {
    workflow_labels: Mutex<HashMap<String, WorkflowLabels>>,
    task_labels: Mutex<HashMap<String, TaskLabels>>,
}

impl InMemoryLabelRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LabelRepository for InMemoryLabelRepository {
    async fn upsert_workflow_labels(&self, labels: WorkflowLabels) -> Result<()> {
        let mut map = self
            .workflow_labels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.insert(labels.workflow_name.clone(), labels);
        Ok(())
    }

    async fn upsert_task_labels(&self, labels: TaskLabels) -> Result<()> {
        let mut map = self.task_labels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.insert(labels.task_name.clone(), labels);
        Ok(())
    }

    async fn delete_missing(&self, workflows_present: &[String], tasks_present: &[String]) -> Result<()> {
        let present_workflows: std::collections::HashSet<&str> =
            workflows_present.iter().map(String::as_str).collect();
        let present_tasks: std::collections::HashSet<&str> = tasks_present.iter().map(String::as_str).collect();

        let mut workflow_labels = self
            .workflow_labels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        workflow_labels.retain(|name, _| present_workflows.contains(name.as_str()));

        let mut task_labels = self.task_labels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        task_labels.retain(|name, _| present_tasks.contains(name.as_str()));
        Ok(())
    }

    async fn recompute_usage_stats(&self) -> Result<Vec<LabelUsageStat>> {
        use crate::model::{LabelEntityType, LabelKind};
        let mut counts: HashMap<(LabelEntityType, LabelKind, String), i64> = HashMap::new();

        let workflow_labels = self
            .workflow_labels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for labels in workflow_labels.values() {
            for tag in &labels.tags {
                *counts
                    .entry((LabelEntityType::Workflow, LabelKind::Tag, tag.clone()))
                    .or_insert(0) += 1;
            }
            for category in &labels.categories {
                *counts
                    .entry((LabelEntityType::Workflow, LabelKind::Category, category.clone()))
                    .or_insert(0) += 1;
            }
        }

        let task_labels = self.task_labels.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for labels in task_labels.values() {
            for tag in &labels.tags {
                *counts
                    .entry((LabelEntityType::Task, LabelKind::Tag, tag.clone()))
                    .or_insert(0) += 1;
            }
            if let Some(category) = &labels.category {
                *counts
                    .entry((LabelEntityType::Task, LabelKind::Category, category.clone()))
                    .or_insert(0) += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|((entity_type, label_kind, label_value), usage_count)| LabelUsageStat {
                entity_type,
                label_kind,
                label_value,
                usage_count,
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBaselineRepository {
    baselines: Mutex<HashMap<(String, Option<String>), Baseline>>,
    anomalies: Mutex<Vec<AnomalyEvent>>,
}

impl InMemoryBaselineRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn anomalies(&self) -> Vec<AnomalyEvent> {
        self.anomalies.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl BaselineRepository for InMemoryBaselineRepository {
    async fn upsert(&self, baseline: Baseline) -> Result<()> {
        let mut baselines = self.baselines.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        baselines.insert(
            (baseline.workflow_name.clone(), baseline.task_id.clone()),
            baseline,
        );
        Ok(())
    }

    async fn get(&self, workflow_name: &str, task_id: Option<&str>) -> Result<Option<Baseline>> {
        let baselines = self.baselines.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(baselines
            .get(&(workflow_name.to_string(), task_id.map(str::to_string)))
            .cloned())
    }

    async fn record_anomaly(&self, event: AnomalyEvent) -> Result<()> {
        let mut anomalies = self.anomalies.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        anomalies.push(event);
        Ok(())
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Serialization { source }
    }
}
