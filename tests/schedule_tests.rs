//! Integration coverage for the schedule trigger loop: a due cron
//! trigger fires an execution, a disabled one never does.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use waygate::discovery::DiscoveryCache;
use waygate::events::EventHub;
use waygate::execution::ExecutionService;
use waygate::model::{ResourceMetadata, TaskStep, TriggerSpec, WorkflowResource, WorkflowSpec};
use waygate::orchestrator::{DefaultOrchestrator, ReqwestTaskStepExecutor};
use waygate::registry::InMemoryRegistryClient;
use waygate::repository::mem::InMemoryExecutionRepository;
use waygate::repository::ExecutionRepository;
use waygate::schedule::ScheduleLoop;

fn workflow_with_trigger(name: &str, trigger: TriggerSpec) -> WorkflowResource {
    WorkflowResource {
        metadata: ResourceMetadata {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: WorkflowSpec {
            tasks: vec![TaskStep {
                id: "t1".to_string(),
                task_ref: "noop".to_string(),
                depends_on: vec![],
                input: BTreeMap::new(),
            }],
            triggers: vec![trigger],
            ..Default::default()
        },
    }
}

fn schedule_trigger(cron: &str, enabled: bool) -> TriggerSpec {
    TriggerSpec::Schedule {
        cron: cron.to_string(),
        enabled,
        input: BTreeMap::new(),
    }
}

#[tokio::test]
async fn due_schedule_starts_an_execution() {
    let registry = Arc::new(InMemoryRegistryClient::new());
    registry.upsert_workflow(workflow_with_trigger("ticker", schedule_trigger("* * * * * *", true)));
    let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(30)));

    let executions = Arc::new(InMemoryExecutionRepository::new());
    let executor = Arc::new(ReqwestTaskStepExecutor::new());
    let orchestrator = Arc::new(DefaultOrchestrator::new(executor, 4));
    let events = Arc::new(EventHub::new());
    let execution = Arc::new(ExecutionService::new(
        discovery.clone(),
        orchestrator,
        Some(executions.clone()),
        events,
        Duration::from_secs(5),
    ));

    let schedule_loop = Arc::new(ScheduleLoop::new(discovery, execution, None, Duration::from_millis(20)));
    let cancellation = CancellationToken::new();
    let loop_ref = schedule_loop.clone();
    let cancel_ref = cancellation.clone();
    let handle = tokio::spawn(async move { loop_ref.run(cancel_ref).await });

    // Let at least one tick run, then stop the loop and check that a
    // background execution was started.
    tokio::time::sleep(Duration::from_millis(60)).await;
    cancellation.cancel();
    handle.await.unwrap();

    let all = executions.list(Some("ticker"), None, 0, 10).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn disabled_schedule_never_fires() {
    let registry = Arc::new(InMemoryRegistryClient::new());
    registry.upsert_workflow(workflow_with_trigger("quiet", schedule_trigger("* * * * * *", false)));
    let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(30)));

    let executions = Arc::new(InMemoryExecutionRepository::new());
    let executor = Arc::new(ReqwestTaskStepExecutor::new());
    let orchestrator = Arc::new(DefaultOrchestrator::new(executor, 4));
    let events = Arc::new(EventHub::new());
    let execution = Arc::new(ExecutionService::new(
        discovery.clone(),
        orchestrator,
        Some(executions.clone()),
        events,
        Duration::from_secs(5),
    ));

    let schedule_loop = Arc::new(ScheduleLoop::new(discovery, execution, None, Duration::from_millis(20)));
    let cancellation = CancellationToken::new();
    let loop_ref = schedule_loop.clone();
    let cancel_ref = cancellation.clone();
    let handle = tokio::spawn(async move { loop_ref.run(cancel_ref).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancellation.cancel();
    handle.await.unwrap();

    let all = executions.list(Some("quiet"), None, 0, 10).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_loop_stops_on_cancellation() {
    let registry = Arc::new(InMemoryRegistryClient::new());
    let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(30)));
    let executions = Arc::new(InMemoryExecutionRepository::new());
    let executor = Arc::new(ReqwestTaskStepExecutor::new());
    let orchestrator = Arc::new(DefaultOrchestrator::new(executor, 4));
    let events = Arc::new(EventHub::new());
    let execution = Arc::new(ExecutionService::new(discovery.clone(), orchestrator, Some(executions), events, Duration::from_secs(5)));

    let schedule_loop = Arc::new(ScheduleLoop::new(discovery, execution, None, Duration::from_millis(10)));
    let cancellation = CancellationToken::new();
    let loop_ref = schedule_loop.clone();
    let cancel_ref = cancellation.clone();
    let handle = tokio::spawn(async move { loop_ref.run(cancel_ref).await });

    cancellation.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}
