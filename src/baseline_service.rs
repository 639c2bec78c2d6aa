//! §4.6 Baseline refresh & anomaly detection.
//!
//! `BaselineRefreshService` periodically recomputes rolling mean/stddev
//! duration baselines per `(workflow, task)` from recent execution
//! history. `AnomalyDetector` scores a single observed duration against
//! the current baseline and, on a hit, publishes an `Anomaly` event —
//! grounded on the teacher's z-score style cost-estimation helpers in
//! `durableengine/cost.rs`, generalized here to duration anomaly
//! scoring instead of cost estimation.

use crate::events::{EventHub, WorkflowEvent};
use crate::model::{AnomalyEvent, AnomalyThresholds, Baseline};
use crate::repository::{BaselineRepository, ExecutionRepository};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EPSILON: f64 = 1e-9;

fn mean_stddev(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub struct BaselineRefreshService {
    executions: Arc<dyn ExecutionRepository>,
    baselines: Arc<dyn BaselineRepository>,
    discovery: Arc<crate::discovery::DiscoveryCache>,
    namespace: Option<String>,
    min_samples: u64,
    window: chrono::Duration,
    poll_interval: Duration,
}

impl BaselineRefreshService {
    #[must_use]
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        baselines: Arc<dyn BaselineRepository>,
        discovery: Arc<crate::discovery::DiscoveryCache>,
        namespace: Option<String>,
        min_samples: u64,
        window_days: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            executions,
            baselines,
            discovery,
            namespace,
            min_samples,
            window: chrono::Duration::days(i64::from(window_days)),
            poll_interval,
        }
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            self.refresh().await;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancellation.cancelled() => return,
            }
        }
    }

    async fn refresh(&self) {
        let workflows = match self.discovery.discover_workflows(self.namespace.as_deref()).await {
            Ok(workflows) => workflows,
            Err(err) => {
                tracing::error!(error = %err, "discovery failed during baseline refresh");
                return;
            }
        };

        let since = Utc::now() - self.window;
        for workflow in &workflows {
            self.refresh_one(&workflow.name(), None, since).await;
            for task in &workflow.spec.tasks {
                self.refresh_one(&workflow.name(), Some(task.id.as_str()), since).await;
            }
        }
    }

    async fn refresh_one(&self, workflow_name: &str, task_id: Option<&str>, since: chrono::DateTime<Utc>) {
        let durations = match self.executions.recent_durations(workflow_name, task_id, since).await {
            Ok(durations) => durations,
            Err(err) => {
                tracing::warn!(workflow = %workflow_name, error = %err, "failed to fetch recent durations");
                return;
            }
        };

        if (durations.len() as u64) < self.min_samples {
            return;
        }

        let (mean, stddev) = mean_stddev(&durations);
        let baseline = Baseline {
            workflow_name: workflow_name.to_string(),
            task_id: task_id.map(str::to_string),
            mean,
            stddev,
            sample_count: durations.len() as u64,
            window_start: since,
            window_end: Utc::now(),
        };

        if let Err(err) = self.baselines.upsert(baseline).await {
            tracing::warn!(workflow = %workflow_name, error = %err, "failed to persist baseline");
        }
    }
}

/// Scores a single observed duration against the current baseline for
/// `(workflow, task)`, publishing an [`WorkflowEvent::Anomaly`] on
/// detection. A missing baseline, a detector error, or a notifier
/// error all resolve to `Ok(None)`/a logged warning — evaluation never
/// blocks the caller's execution pipeline.
pub struct AnomalyDetector {
    baselines: Arc<dyn BaselineRepository>,
    events: Arc<EventHub>,
    thresholds: AnomalyThresholds,
}

impl AnomalyDetector {
    #[must_use]
    pub fn new(baselines: Arc<dyn BaselineRepository>, events: Arc<EventHub>) -> Self {
        Self {
            baselines,
            events,
            thresholds: AnomalyThresholds::default(),
        }
    }

    pub async fn evaluate(
        &self,
        workflow_name: &str,
        task_id: Option<&str>,
        duration_ms: f64,
        execution_id: Uuid,
    ) -> Option<AnomalyEvent> {
        let baseline = match self.baselines.get(workflow_name, task_id).await {
            Ok(baseline) => baseline?,
            Err(err) => {
                tracing::warn!(workflow = %workflow_name, error = %err, "baseline lookup failed during anomaly evaluation");
                return None;
            }
        };

        let z = (duration_ms - baseline.mean) / baseline.stddev.max(EPSILON);
        let severity = self.thresholds.classify(z.abs())?;

        let event = AnomalyEvent {
            workflow_name: workflow_name.to_string(),
            task_id: task_id.map(str::to_string),
            execution_id,
            severity,
            z_score: z,
            actual: duration_ms,
            expected: baseline.mean,
            occurred_at: Utc::now(),
        };

        if let Err(err) = self.baselines.record_anomaly(event.clone()).await {
            tracing::warn!(workflow = %workflow_name, error = %err, "failed to record anomaly");
        }

        self.events.publish(WorkflowEvent::Anomaly {
            execution_id,
            timestamp: event.occurred_at,
            workflow_name: event.workflow_name.clone(),
            task_id: event.task_id.clone(),
            severity: event.severity,
            z_score: event.z_score,
        });

        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::mem::InMemoryBaselineRepository;

    #[tokio::test]
    async fn no_baseline_yields_no_anomaly() {
        let baselines = Arc::new(InMemoryBaselineRepository::new());
        let events = Arc::new(EventHub::new());
        let detector = AnomalyDetector::new(baselines, events);
        let result = detector.evaluate("greet", None, 500.0, Uuid::new_v4()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duration_far_from_mean_is_flagged_critical() {
        let baselines = Arc::new(InMemoryBaselineRepository::new());
        baselines
            .upsert(Baseline {
                workflow_name: "greet".to_string(),
                task_id: None,
                mean: 100.0,
                stddev: 10.0,
                sample_count: 30,
                window_start: Utc::now() - chrono::Duration::days(30),
                window_end: Utc::now(),
            })
            .await
            .unwrap();
        let events = Arc::new(EventHub::new());
        let detector = AnomalyDetector::new(baselines.clone(), events.clone());
        let mut rx = events.subscribe(crate::events::VISUALIZATION_GROUP);

        let anomaly = detector
            .evaluate("greet", None, 200.0, Uuid::new_v4())
            .await
            .expect("200ms is 10 stddev above a 100ms/10ms baseline");

        assert_eq!(anomaly.severity, crate::model::Severity::Critical);
        assert!(rx.try_recv().is_ok());
        assert_eq!(baselines.anomalies().len(), 1);
    }

    #[tokio::test]
    async fn duration_within_low_threshold_is_not_flagged() {
        let baselines = Arc::new(InMemoryBaselineRepository::new());
        baselines
            .upsert(Baseline {
                workflow_name: "greet".to_string(),
                task_id: None,
                mean: 100.0,
                stddev: 10.0,
                sample_count: 30,
                window_start: Utc::now() - chrono::Duration::days(30),
                window_end: Utc::now(),
            })
            .await
            .unwrap();
        let events = Arc::new(EventHub::new());
        let detector = AnomalyDetector::new(baselines, events);
        let result = detector.evaluate("greet", None, 105.0, Uuid::new_v4()).await;
        assert!(result.is_none());
    }

    #[test]
    fn mean_stddev_matches_known_sample() {
        let (mean, stddev) = mean_stddev(&[10.0, 10.0, 10.0, 10.0]);
        assert_eq!(mean, 10.0);
        assert_eq!(stddev, 0.0);
    }
}
