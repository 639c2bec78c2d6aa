//! Process bootstrap: wires every component named in §2's cold-start
//! narrative into a runnable server, then hands the resulting
//! [`axum::Router`] and background loops to the caller (`cmd::serve`).
//!
//! Grounded on the teacher's `cmd::run::execute_workflow` wiring style
//! (build collaborators bottom-up, spawn background tasks, await a
//! shutdown signal) generalized from a one-shot CLI run to a
//! long-lived service with four cooperating background loops.

use crate::baseline_service::{AnomalyDetector, BaselineRefreshService};
use crate::blast_radius::BlastRadiusIndex;
use crate::config::WaygateConfig;
use crate::discovery::DiscoveryCache;
use crate::endpoints::EndpointRegistry;
use crate::events::EventHub;
use crate::execution::ExecutionService;
use crate::http::{self, AppState};
use crate::orchestrator::{DefaultOrchestrator, ReqwestTaskStepExecutor};
use crate::registry::{InMemoryRegistryClient, ResourceRegistryClient};
use crate::repository::mem::{
    InMemoryBaselineRepository, InMemoryExecutionRepository, InMemoryLabelRepository,
    InMemoryVersionRepository,
};
use crate::repository::sqlite::SqliteStore;
use crate::repository::{BaselineRepository, ExecutionRepository, LabelRepository, WorkflowVersionRepository};
use crate::schedule::ScheduleLoop;
use crate::versioning::VersioningService;
use crate::watcher::WatcherLoop;
use axum::Router;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to connect to storage backend: {source}"))]
    Storage { source: crate::repository::Error },
    #[snafu(display("failed to seed registry from {path}: {source}"))]
    Seed {
        path: String,
        source: crate::registry::SeedError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a running gateway process needs: the HTTP router plus
/// the three background loops the caller spawns alongside it.
pub struct Application {
    pub router: Router,
    pub watcher: WatcherLoop,
    pub schedule: ScheduleLoop,
    pub baseline: Option<BaselineRefreshService>,
}

/// Builds every collaborator from `config` and returns the assembled
/// [`Application`]. The registry is seeded once, synchronously, from
/// `config.registry.resource_dir` if set — the watcher loop takes over
/// from there, polling the same `ResourceRegistryClient` the seed
/// wrote into.
pub async fn build(config: &WaygateConfig) -> Result<Application> {
    let registry = Arc::new(InMemoryRegistryClient::new());
    if let Some(dir) = &config.registry.resource_dir {
        crate::registry::seed_from_directory(&registry, dir).context(SeedSnafu { path: dir.clone() })?;
    }
    let registry: Arc<dyn ResourceRegistryClient> = registry;

    let namespace = config.discovery.namespace.clone();
    let discovery = Arc::new(DiscoveryCache::new(
        registry,
        Duration::from_secs(config.discovery.ttl_secs),
    ));
    let endpoints = Arc::new(EndpointRegistry::new());
    let blast_radius = Arc::new(BlastRadiusIndex::new());
    let events = Arc::new(EventHub::new());

    let (executions, versions, labels, baselines): (
        Arc<dyn ExecutionRepository>,
        Arc<dyn WorkflowVersionRepository>,
        Arc<dyn LabelRepository>,
        Arc<dyn BaselineRepository>,
    ) = match &config.storage.database_url {
        Some(url) => {
            let store = SqliteStore::new(url).await.context(StorageSnafu)?;
            (
                Arc::new(store.executions()),
                Arc::new(store.versions()),
                Arc::new(store.labels()),
                Arc::new(store.baselines()),
            )
        }
        None => (
            Arc::new(InMemoryExecutionRepository::new()),
            Arc::new(InMemoryVersionRepository::new()),
            Arc::new(InMemoryLabelRepository::new()),
            Arc::new(InMemoryBaselineRepository::new()),
        ),
    };

    let versioning = Arc::new(VersioningService::new(versions.clone()));

    let task_executor = Arc::new(ReqwestTaskStepExecutor::new());
    let orchestrator = Arc::new(DefaultOrchestrator::new(
        task_executor,
        config.execution.task_concurrency,
    ));

    let anomaly_detector = if config.baseline.enabled {
        Some(Arc::new(AnomalyDetector::new(baselines.clone(), events.clone())))
    } else {
        None
    };

    let mut execution = ExecutionService::new(
        discovery.clone(),
        orchestrator,
        Some(executions.clone()),
        events.clone(),
        Duration::from_secs(config.execution.timeout_secs),
    );
    if let Some(detector) = &anomaly_detector {
        execution = execution.with_anomaly_detector(detector.clone());
    }
    let execution = Arc::new(execution);

    let watcher = WatcherLoop::new(
        discovery.clone(),
        endpoints.clone(),
        blast_radius.clone(),
        versioning,
        Some(labels),
        namespace.clone(),
        Duration::from_secs(config.watcher.poll_interval_secs),
    );

    let schedule = ScheduleLoop::new(
        discovery.clone(),
        execution.clone(),
        namespace.clone(),
        Duration::from_secs(config.schedule.poll_interval_secs),
    );

    let baseline = if config.baseline.enabled {
        Some(BaselineRefreshService::new(
            executions.clone(),
            baselines.clone(),
            discovery.clone(),
            namespace,
            config.baseline.min_samples,
            config.baseline.window_days,
            Duration::from_secs(config.baseline.refresh_interval_secs),
        ))
    } else {
        None
    };

    let state = AppState {
        discovery,
        endpoints,
        blast_radius,
        execution,
        events,
        executions,
        versions,
        baselines: Some(baselines),
        anomaly_detector,
    };

    Ok(Application {
        router: http::router(state),
        watcher,
        schedule,
        baseline,
    })
}

/// Runs the HTTP server and every background loop until `cancellation`
/// fires, then lets in-flight work drain before returning.
pub async fn run(
    config: &WaygateConfig,
    cancellation: CancellationToken,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %config.server.bind_addr, "waygate listening");

    let watcher_cancel = cancellation.clone();
    let watcher_handle = tokio::spawn(async move { app.watcher.run(watcher_cancel).await });

    let schedule_cancel = cancellation.clone();
    let schedule_handle = tokio::spawn(async move { app.schedule.run(schedule_cancel).await });

    let baseline_handle = app.baseline.map(|service| {
        let baseline_cancel = cancellation.clone();
        tokio::spawn(async move { service.run(baseline_cancel).await })
    });

    let server_cancel = cancellation.clone();
    axum::serve(listener, app.router)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    let _ = watcher_handle.await;
    let _ = schedule_handle.await;
    if let Some(handle) = baseline_handle {
        let _ = handle.await;
    }

    Ok(())
}
