//! §4.6 integration coverage: recorded execution durations flow through
//! `BaselineRefreshService` into a persisted `Baseline`, which
//! `AnomalyDetector` then scores a fresh duration against.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waygate::baseline_service::{AnomalyDetector, BaselineRefreshService};
use waygate::discovery::DiscoveryCache;
use waygate::events::EventHub;
use waygate::model::{ExecutionRecord, ExecutionStatus, ResourceMetadata, WorkflowResource};
use waygate::registry::InMemoryRegistryClient;
use waygate::repository::mem::{InMemoryBaselineRepository, InMemoryExecutionRepository};
use waygate::repository::{BaselineRepository, ExecutionRepository};

fn wf(name: &str) -> WorkflowResource {
    WorkflowResource {
        metadata: ResourceMetadata {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Default::default(),
    }
}

fn succeeded_execution(workflow_name: &str, duration_ms: i64) -> ExecutionRecord {
    let now = chrono::Utc::now();
    ExecutionRecord {
        id: Uuid::new_v4(),
        workflow_name: workflow_name.to_string(),
        namespace: "default".to_string(),
        status: ExecutionStatus::Succeeded,
        started_at: now - chrono::Duration::milliseconds(duration_ms),
        completed_at: Some(now),
        duration_ms: Some(duration_ms),
        input_snapshot: serde_json::json!({}),
        output: None,
        error: None,
        tasks: Vec::new(),
    }
}

#[tokio::test]
async fn refresh_computes_a_baseline_from_recorded_durations_then_flags_an_anomaly() {
    let registry = Arc::new(InMemoryRegistryClient::new());
    registry.upsert_workflow(wf("greet"));
    let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(30)));

    let executions = Arc::new(InMemoryExecutionRepository::new());
    for duration in [100, 100, 100, 100, 100] {
        executions.save(succeeded_execution("greet", duration)).await.unwrap();
    }

    let baselines = Arc::new(InMemoryBaselineRepository::new());
    let service = Arc::new(BaselineRefreshService::new(
        executions,
        baselines.clone(),
        discovery,
        None,
        5,
        30,
        Duration::from_millis(20),
    ));

    let cancellation = CancellationToken::new();
    let service_ref = service.clone();
    let cancel_ref = cancellation.clone();
    let handle = tokio::spawn(async move { service_ref.run(cancel_ref).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancellation.cancel();
    handle.await.unwrap();

    let baseline = baselines
        .get("greet", None)
        .await
        .unwrap()
        .expect("refresh should have computed a baseline for the whole-workflow duration");
    assert_eq!(baseline.sample_count, 5);
    assert_eq!(baseline.mean, 100.0);

    let events = Arc::new(EventHub::new());
    let detector = AnomalyDetector::new(baselines, events.clone());
    let mut rx = events.subscribe(waygate::events::VISUALIZATION_GROUP);

    // Every recorded sample is exactly 100ms, so stddev is 0 and any
    // deviation at all is an anomaly under the detector's thresholds.
    let anomaly = detector
        .evaluate("greet", None, 500.0, Uuid::new_v4())
        .await
        .expect("a 5x deviation from a zero-stddev baseline should be flagged");
    assert!(anomaly.z_score.is_infinite() || anomaly.z_score > 0.0);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn refresh_skips_workflows_below_min_samples() {
    let registry = Arc::new(InMemoryRegistryClient::new());
    registry.upsert_workflow(wf("quiet"));
    let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(30)));

    let executions = Arc::new(InMemoryExecutionRepository::new());
    executions.save(succeeded_execution("quiet", 100)).await.unwrap();

    let baselines = Arc::new(InMemoryBaselineRepository::new());
    let service = Arc::new(BaselineRefreshService::new(
        executions,
        baselines.clone(),
        discovery,
        None,
        5,
        30,
        Duration::from_millis(20),
    ));

    let cancellation = CancellationToken::new();
    let service_ref = service.clone();
    let cancel_ref = cancellation.clone();
    let handle = tokio::spawn(async move { service_ref.run(cancel_ref).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancellation.cancel();
    handle.await.unwrap();

    assert!(baselines.get("quiet", None).await.unwrap().is_none());
}
