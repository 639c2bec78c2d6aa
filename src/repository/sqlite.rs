//! SQLite-backed repositories, grounded on the teacher's
//! `providers/persistence/sqlite.rs` and `providers/cache/sqlite.rs`:
//! a `SqlitePool`, schema loaded via `include_str!`, hand-written
//! parameterized queries, and JSON-serialized payload columns.

use super::{
    BaselineRepository, DurationDataPoint, Error, ExecutionRepository, LabelRepository, Result,
    WorkflowStatistics, WorkflowVersionRepository,
};
use crate::model::{
    AnomalyEvent, Baseline, ExecutionRecord, ExecutionStatus, LabelUsageStat, Severity, TaskExecutionRecord,
    TaskLabels, WorkflowLabels, WorkflowVersion,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

fn db_err(message: impl Into<String>) -> Error {
    Error::Database {
        message: message.into(),
    }
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| db_err(format!("failed to parse timestamp: {e}")))
}

/// Shared connection pool backing all four SQLite repositories. Each
/// repository wraps a clone of the same pool; schema init runs once
/// per pool creation, matching the teacher's `with_pool` pattern.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| db_err(format!("failed to connect to SQLite: {e}")))?;

        sqlx::query(include_str!("./sql/schema_sqlite.sql"))
            .execute(&pool)
            .await
            .map_err(|e| db_err(format!("failed to execute schema: {e}")))?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn executions(&self) -> SqliteExecutionRepository {
        SqliteExecutionRepository {
            pool: self.pool.clone(),
        }
    }

    #[must_use]
    pub fn versions(&self) -> SqliteVersionRepository {
        SqliteVersionRepository {
            pool: self.pool.clone(),
        }
    }

    #[must_use]
    pub fn labels(&self) -> SqliteLabelRepository {
        SqliteLabelRepository {
            pool: self.pool.clone(),
        }
    }

    #[must_use]
    pub fn baselines(&self) -> SqliteBaselineRepository {
        SqliteBaselineRepository {
            pool: self.pool.clone(),
        }
    }
}

#[derive(Debug)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

fn row_to_execution(
    id: String,
    workflow_name: String,
    namespace: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    input_snapshot: String,
    output: Option<String>,
    error: Option<String>,
    tasks: String,
) -> Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: Uuid::parse_str(&id).map_err(|e| db_err(format!("invalid execution id: {e}")))?,
        workflow_name,
        namespace,
        status: ExecutionStatus::from_str(&status).map_err(db_err)?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        duration_ms,
        input_snapshot: serde_json::from_str(&input_snapshot)?,
        output: output.map(|s| serde_json::from_str(&s)).transpose()?,
        error,
        tasks: serde_json::from_str(&tasks)?,
    })
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, record: ExecutionRecord) -> Result<()> {
        let input_snapshot = serde_json::to_string(&record.input_snapshot)?;
        let output = record.output.as_ref().map(serde_json::to_string).transpose()?;
        let tasks = serde_json::to_string(&record.tasks)?;

        sqlx::query(
            "INSERT OR REPLACE INTO executions \
             (id, workflow_name, namespace, status, started_at, completed_at, duration_ms, input_snapshot, output, error, tasks) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.workflow_name)
        .bind(&record.namespace)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.duration_ms)
        .bind(input_snapshot)
        .bind(output)
        .bind(&record.error)
        .bind(tasks)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to save execution: {e}")))?;

        Ok(())
    }

    async fn list(
        &self,
        workflow_name: Option<&str>,
        status: Option<ExecutionStatus>,
        skip: u64,
        take: u64,
    ) -> Result<Vec<ExecutionRecord>> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<i64>,
            String,
            Option<String>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            "SELECT id, workflow_name, namespace, status, started_at, completed_at, duration_ms, \
             input_snapshot, output, error, tasks FROM executions \
             WHERE (?1 IS NULL OR workflow_name = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY started_at ASC LIMIT ?3 OFFSET ?4",
        )
        .bind(workflow_name)
        .bind(status.map(ExecutionStatus::as_str))
        .bind(take as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to list executions: {e}")))?;

        rows.into_iter()
            .map(|(id, wf, ns, st, started, completed, dur, input, output, error, tasks)| {
                row_to_execution(id, wf, ns, st, started, completed, dur, input, output, error, tasks)
            })
            .collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<i64>,
            String,
            Option<String>,
            Option<String>,
            String,
        )> = sqlx::query_as(
            "SELECT id, workflow_name, namespace, status, started_at, completed_at, duration_ms, \
             input_snapshot, output, error, tasks FROM executions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to get execution: {e}")))?;

        row.map(|(id, wf, ns, st, started, completed, dur, input, output, error, tasks)| {
            row_to_execution(id, wf, ns, st, started, completed, dur, input, output, error, tasks)
        })
        .transpose()
    }

    async fn get_all_workflow_statistics(&self) -> Result<HashMap<String, WorkflowStatistics>> {
        let rows: Vec<(String, String, Option<i64>)> =
            sqlx::query_as("SELECT workflow_name, status, duration_ms FROM executions")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(format!("failed to aggregate statistics: {e}")))?;

        let mut stats: HashMap<String, WorkflowStatistics> = HashMap::new();
        let mut durations: HashMap<String, Vec<f64>> = HashMap::new();
        for (workflow_name, status, duration_ms) in rows {
            let entry = stats
                .entry(workflow_name.clone())
                .or_insert_with(|| WorkflowStatistics {
                    workflow_name: workflow_name.clone(),
                    total_executions: 0,
                    succeeded: 0,
                    failed: 0,
                    canceled: 0,
                    average_duration_ms: None,
                });
            entry.total_executions += 1;
            match ExecutionStatus::from_str(&status).map_err(db_err)? {
                ExecutionStatus::Succeeded => entry.succeeded += 1,
                ExecutionStatus::Failed => entry.failed += 1,
                ExecutionStatus::Canceled => entry.canceled += 1,
                ExecutionStatus::Running => {}
            }
            if let Some(d) = duration_ms {
                durations.entry(workflow_name).or_default().push(d as f64);
            }
        }
        for (name, stat) in stats.iter_mut() {
            if let Some(values) = durations.get(name) {
                if !values.is_empty() {
                    stat.average_duration_ms = Some(values.iter().sum::<f64>() / values.len() as f64);
                }
            }
        }
        Ok(stats)
    }

    async fn get_duration_trends(
        &self,
        workflow_name: &str,
        days_back: u32,
    ) -> Result<Vec<DurationDataPoint>> {
        let since = (chrono::Utc::now() - chrono::Duration::days(i64::from(days_back))).to_rfc3339();
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT started_at, duration_ms FROM executions \
             WHERE workflow_name = ? AND started_at >= ? AND duration_ms IS NOT NULL \
             ORDER BY started_at ASC",
        )
        .bind(workflow_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to get duration trends: {e}")))?;

        rows.into_iter()
            .map(|(executed_at, duration_ms)| {
                Ok(DurationDataPoint {
                    executed_at: parse_timestamp(&executed_at)?,
                    duration_ms,
                })
            })
            .collect()
    }

    async fn recent_durations(
        &self,
        workflow_name: &str,
        task_id: Option<&str>,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<f64>> {
        match task_id {
            None => {
                let rows: Vec<(i64,)> = sqlx::query_as(
                    "SELECT duration_ms FROM executions \
                     WHERE workflow_name = ? AND started_at >= ? AND duration_ms IS NOT NULL",
                )
                .bind(workflow_name)
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(format!("failed to fetch recent durations: {e}")))?;
                Ok(rows.into_iter().map(|(d,)| d as f64).collect())
            }
            Some(task_id) => {
                let rows: Vec<(String,)> = sqlx::query_as(
                    "SELECT tasks FROM executions WHERE workflow_name = ? AND started_at >= ?",
                )
                .bind(workflow_name)
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(format!("failed to fetch recent durations: {e}")))?;

                let mut durations = Vec::new();
                for (tasks_json,) in rows {
                    let tasks: Vec<TaskExecutionRecord> = serde_json::from_str(&tasks_json)?;
                    for task in tasks {
                        if task.task_id == task_id {
                            if let Some(d) = task.duration_ms {
                                durations.push(d as f64);
                            }
                        }
                    }
                }
                Ok(durations)
            }
        }
    }
}

#[derive(Debug)]
pub struct SqliteVersionRepository {
    pool: SqlitePool,
}

#[async_trait]
impl WorkflowVersionRepository for SqliteVersionRepository {
    async fn latest(&self, workflow_name: &str) -> Result<Option<WorkflowVersion>> {
        let row: Option<(String, i64, String, String, String)> = sqlx::query_as(
            "SELECT workflow_name, revision, captured_at, content_hash, spec_snapshot \
             FROM workflow_versions WHERE workflow_name = ? ORDER BY revision DESC LIMIT 1",
        )
        .bind(workflow_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to get latest version: {e}")))?;

        row.map(|(workflow_name, revision, captured_at, content_hash, spec_snapshot)| {
            Ok(WorkflowVersion {
                workflow_name,
                revision,
                captured_at: parse_timestamp(&captured_at)?,
                content_hash,
                spec_snapshot: serde_json::from_str(&spec_snapshot)?,
            })
        })
        .transpose()
    }

    async fn append(&self, version: WorkflowVersion) -> Result<()> {
        let spec_snapshot = serde_json::to_string(&version.spec_snapshot)?;
        sqlx::query(
            "INSERT INTO workflow_versions (workflow_name, revision, captured_at, content_hash, spec_snapshot) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&version.workflow_name)
        .bind(version.revision)
        .bind(version.captured_at.to_rfc3339())
        .bind(&version.content_hash)
        .bind(spec_snapshot)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to append version: {e}")))?;
        Ok(())
    }

    async fn list(&self, workflow_name: &str) -> Result<Vec<WorkflowVersion>> {
        let rows: Vec<(String, i64, String, String, String)> = sqlx::query_as(
            "SELECT workflow_name, revision, captured_at, content_hash, spec_snapshot \
             FROM workflow_versions WHERE workflow_name = ? ORDER BY revision ASC",
        )
        .bind(workflow_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to list versions: {e}")))?;

        rows.into_iter()
            .map(|(workflow_name, revision, captured_at, content_hash, spec_snapshot)| {
                Ok(WorkflowVersion {
                    workflow_name,
                    revision,
                    captured_at: parse_timestamp(&captured_at)?,
                    content_hash,
                    spec_snapshot: serde_json::from_str(&spec_snapshot)?,
                })
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct SqliteLabelRepository {
    pool: SqlitePool,
}

#[async_trait]
impl LabelRepository for SqliteLabelRepository {
    async fn upsert_workflow_labels(&self, labels: WorkflowLabels) -> Result<()> {
        let tags = serde_json::to_string(&labels.tags)?;
        let categories = serde_json::to_string(&labels.categories)?;
        sqlx::query(
            "INSERT OR REPLACE INTO workflow_labels (workflow_name, namespace, tags, categories, synced_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&labels.workflow_name)
        .bind(&labels.namespace)
        .bind(tags)
        .bind(categories)
        .bind(labels.synced_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to upsert workflow labels: {e}")))?;
        Ok(())
    }

    async fn upsert_task_labels(&self, labels: TaskLabels) -> Result<()> {
        let tags = serde_json::to_string(&labels.tags)?;
        sqlx::query(
            "INSERT OR REPLACE INTO task_labels (task_name, namespace, tags, category, synced_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&labels.task_name)
        .bind(&labels.namespace)
        .bind(tags)
        .bind(&labels.category)
        .bind(labels.synced_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to upsert task labels: {e}")))?;
        Ok(())
    }

    async fn delete_missing(&self, workflows_present: &[String], tasks_present: &[String]) -> Result<()> {
        let existing_workflows: Vec<(String,)> = sqlx::query_as("SELECT workflow_name FROM workflow_labels")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(format!("failed to list workflow labels: {e}")))?;
        for (workflow_name,) in existing_workflows {
            if !workflows_present.contains(&workflow_name) {
                sqlx::query("DELETE FROM workflow_labels WHERE workflow_name = ?")
                    .bind(&workflow_name)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| db_err(format!("failed to delete workflow labels: {e}")))?;
            }
        }

        let existing_tasks: Vec<(String,)> = sqlx::query_as("SELECT task_name FROM task_labels")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(format!("failed to list task labels: {e}")))?;
        for (task_name,) in existing_tasks {
            if !tasks_present.contains(&task_name) {
                sqlx::query("DELETE FROM task_labels WHERE task_name = ?")
                    .bind(&task_name)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| db_err(format!("failed to delete task labels: {e}")))?;
            }
        }
        Ok(())
    }

    async fn recompute_usage_stats(&self) -> Result<Vec<LabelUsageStat>> {
        use crate::model::{LabelEntityType, LabelKind};
        let mut counts: HashMap<(LabelEntityType, LabelKind, String), i64> = HashMap::new();

        let workflow_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT tags, categories FROM workflow_labels")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(format!("failed to read workflow labels: {e}")))?;
        for (tags_json, categories_json) in workflow_rows {
            let tags: Vec<String> = serde_json::from_str(&tags_json)?;
            let categories: Vec<String> = serde_json::from_str(&categories_json)?;
            for tag in tags {
                *counts.entry((LabelEntityType::Workflow, LabelKind::Tag, tag)).or_insert(0) += 1;
            }
            for category in categories {
                *counts
                    .entry((LabelEntityType::Workflow, LabelKind::Category, category))
                    .or_insert(0) += 1;
            }
        }

        let task_rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT tags, category FROM task_labels")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(format!("failed to read task labels: {e}")))?;
        for (tags_json, category) in task_rows {
            let tags: Vec<String> = serde_json::from_str(&tags_json)?;
            for tag in tags {
                *counts.entry((LabelEntityType::Task, LabelKind::Tag, tag)).or_insert(0) += 1;
            }
            if let Some(category) = category {
                *counts
                    .entry((LabelEntityType::Task, LabelKind::Category, category))
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

#[derive(Debug)]
pub struct SqliteBaselineRepository {
    pool: SqlitePool,
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Low => "Low",
        Severity::Medium => "Medium",
        Severity::High => "High",
        Severity::Critical => "Critical",
    }
}

fn severity_from_str(s: &str) -> Result<Severity> {
    match s {
        "Low" => Ok(Severity::Low),
        "Medium" => Ok(Severity::Medium),
        "High" => Ok(Severity::High),
        "Critical" => Ok(Severity::Critical),
        other => Err(db_err(format!("unknown severity: {other}"))),
    }
}

#[async_trait]
impl BaselineRepository for SqliteBaselineRepository {
    async fn upsert(&self, baseline: Baseline) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO baselines \
             (workflow_name, task_id, mean, stddev, sample_count, window_start, window_end) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&baseline.workflow_name)
        .bind(baseline.task_id.clone().unwrap_or_default())
        .bind(baseline.mean)
        .bind(baseline.stddev)
        .bind(baseline.sample_count as i64)
        .bind(baseline.window_start.to_rfc3339())
        .bind(baseline.window_end.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to upsert baseline: {e}")))?;
        Ok(())
    }

    async fn get(&self, workflow_name: &str, task_id: Option<&str>) -> Result<Option<Baseline>> {
        let row: Option<(String, String, f64, f64, i64, String, String)> = sqlx::query_as(
            "SELECT workflow_name, task_id, mean, stddev, sample_count, window_start, window_end \
             FROM baselines WHERE workflow_name = ? AND task_id = ?",
        )
        .bind(workflow_name)
        .bind(task_id.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to get baseline: {e}")))?;

        row.map(
            |(workflow_name, task_id, mean, stddev, sample_count, window_start, window_end)| {
                Ok(Baseline {
                    workflow_name,
                    task_id: if task_id.is_empty() { None } else { Some(task_id) },
                    mean,
                    stddev,
                    sample_count: sample_count as u64,
                    window_start: parse_timestamp(&window_start)?,
                    window_end: parse_timestamp(&window_end)?,
                })
            },
        )
        .transpose()
    }

    async fn record_anomaly(&self, event: AnomalyEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO anomaly_events \
             (workflow_name, task_id, execution_id, severity, z_score, actual, expected, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.workflow_name)
        .bind(&event.task_id)
        .bind(event.execution_id.to_string())
        .bind(severity_str(event.severity))
        .bind(event.z_score)
        .bind(event.actual)
        .bind(event.expected)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(format!("failed to record anomaly: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn sample_execution() -> ExecutionRecord {
        ExecutionRecord::new_running(
            Uuid::new_v4(),
            "greet".to_string(),
            "default".to_string(),
            serde_json::json!({"name": "world"}),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn execution_round_trips_through_sqlite() {
        let repo = store().await.executions();
        let record = sample_execution();
        let id = record.id;
        repo.save(record).await.unwrap();

        let fetched = repo.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.workflow_name, "greet");
        assert_eq!(fetched.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn save_is_upsert_by_id() {
        let repo = store().await.executions();
        let mut record = sample_execution();
        let id = record.id;
        repo.save(record.clone()).await.unwrap();

        record.status = ExecutionStatus::Succeeded;
        record.completed_at = Some(chrono::Utc::now());
        record.duration_ms = Some(42);
        repo.save(record).await.unwrap();

        let all = repo.list(Some("greet"), None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn version_append_tracks_latest_revision() {
        let repo = store().await.versions();
        repo.append(WorkflowVersion {
            workflow_name: "greet".to_string(),
            revision: 1,
            captured_at: chrono::Utc::now(),
            content_hash: "abc".to_string(),
            spec_snapshot: serde_json::json!({"v": 1}),
        })
        .await
        .unwrap();
        repo.append(WorkflowVersion {
            workflow_name: "greet".to_string(),
            revision: 2,
            captured_at: chrono::Utc::now(),
            content_hash: "def".to_string(),
            spec_snapshot: serde_json::json!({"v": 2}),
        })
        .await
        .unwrap();

        let latest = repo.latest("greet").await.unwrap().unwrap();
        assert_eq!(latest.revision, 2);
        assert_eq!(repo.list("greet").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn baseline_upsert_and_anomaly_log() {
        let repo = store().await.baselines();
        let baseline = Baseline {
            workflow_name: "greet".to_string(),
            task_id: None,
            mean: 100.0,
            stddev: 10.0,
            sample_count: 20,
            window_start: chrono::Utc::now() - chrono::Duration::days(30),
            window_end: chrono::Utc::now(),
        };
        repo.upsert(baseline.clone()).await.unwrap();
        let fetched = repo.get("greet", None).await.unwrap().unwrap();
        assert_eq!(fetched.mean, 100.0);

        repo.record_anomaly(AnomalyEvent {
            workflow_name: "greet".to_string(),
            task_id: None,
            execution_id: Uuid::new_v4(),
            severity: Severity::High,
            z_score: 4.5,
            actual: 400.0,
            expected: 100.0,
            occurred_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn label_delete_missing_prunes_absent_entities() {
        let repo = store().await.labels();
        repo.upsert_workflow_labels(WorkflowLabels {
            workflow_name: "greet".to_string(),
            namespace: "default".to_string(),
            tags: vec!["demo".to_string()],
            categories: vec![],
            synced_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
        repo.upsert_workflow_labels(WorkflowLabels {
            workflow_name: "stale".to_string(),
            namespace: "default".to_string(),
            tags: vec![],
            categories: vec![],
            synced_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

        repo.delete_missing(&["greet".to_string()], &[]).await.unwrap();

        let stats = repo.recompute_usage_stats().await.unwrap();
        assert!(stats.iter().any(|s| s.label_value == "demo"));
    }
}
