//! §4.2 Watcher loop — the single process-wide poll that keeps the
//! endpoint registry, blast-radius index, version history and label
//! sync current with what discovery reports.
//!
//! `run` bootstraps the registry with a full `sync_all` before the
//! first tick, then every tick computes `(added, removed)` against the
//! registry's own prior state (§4.2) and reconciles it via
//! `on_workflows_changed` rather than re-registering everything every
//! time. Workflows whose task graph fails `validate_dag` (duplicate
//! id, unknown dependency, or a cycle) are logged and excluded from the
//! tick entirely — no endpoint, no blast-radius entry, no version
//! record — rather than silently dropping their cyclic nodes later at
//! execution time.
//!
//! Grounded on the teacher's container-refresh loop pattern (poll,
//! diff, act, sleep, repeat) in `providers/mod.rs`; each step here is
//! error-isolated so one workflow's bad version snapshot never stalls
//! the rest of the batch.

use crate::blast_radius::BlastRadiusIndex;
use crate::discovery::DiscoveryCache;
use crate::endpoints::EndpointRegistry;
use crate::model::{TaskLabels, WorkflowLabels};
use crate::repository::LabelRepository;
use crate::versioning::VersioningService;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct WatcherLoop {
    discovery: Arc<DiscoveryCache>,
    endpoints: Arc<EndpointRegistry>,
    blast_radius: Arc<BlastRadiusIndex>,
    versioning: Arc<VersioningService>,
    labels: Option<Arc<dyn LabelRepository>>,
    namespace: Option<String>,
    poll_interval: Duration,
}

impl WatcherLoop {
    #[must_use]
    pub fn new(
        discovery: Arc<DiscoveryCache>,
        endpoints: Arc<EndpointRegistry>,
        blast_radius: Arc<BlastRadiusIndex>,
        versioning: Arc<VersioningService>,
        labels: Option<Arc<dyn LabelRepository>>,
        namespace: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            discovery,
            endpoints,
            blast_radius,
            versioning,
            labels,
            namespace,
            poll_interval,
        }
    }

    /// Runs until `cancellation` fires. The registry is bootstrapped
    /// with a full `sync_all` before the first tick, so endpoints exist
    /// the moment the loop starts rather than only after the first poll
    /// interval elapses; every tick after that reconciles incrementally
    /// via `(added, removed)` against the registry's own prior state.
    /// Each tick is independent: a discovery failure is logged and the
    /// loop simply waits for the next tick rather than exiting.
    pub async fn run(&self, cancellation: CancellationToken) {
        let namespace = self.namespace.as_deref();
        if let Err(err) = self.endpoints.sync_all(&self.discovery, namespace).await {
            tracing::error!(error = %err, "initial endpoint sync failed");
        }
        loop {
            self.tick().await;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancellation.cancelled() => return,
            }
        }
    }

    async fn tick(&self) {
        let namespace = self.namespace.as_deref();
        let discovered = match self.discovery.discover_workflows(namespace).await {
            Ok(workflows) => workflows,
            Err(err) => {
                tracing::error!(error = %err, "discovery failed during watch tick");
                return;
            }
        };

        let mut workflows = Vec::with_capacity(discovered.len());
        for workflow in discovered {
            if let Err(err) = workflow.validate_dag() {
                tracing::warn!(workflow = %workflow.name(), error = %err, "workflow task graph is invalid, skipping");
                continue;
            }
            workflows.push(workflow);
        }

        self.blast_radius.rebuild(&workflows);

        let previous: std::collections::HashSet<String> =
            self.endpoints.registered_names().into_iter().collect();
        let current: std::collections::HashSet<String> =
            workflows.iter().map(|w| w.name().to_lowercase()).collect();
        let added: Vec<String> = workflows
            .iter()
            .map(|w| w.name())
            .filter(|name| !previous.contains(&name.to_lowercase()))
            .collect();
        let removed: Vec<String> = previous.difference(&current).cloned().collect();

        if !added.is_empty() || !removed.is_empty() {
            if let Err(err) = self
                .endpoints
                .on_workflows_changed(&self.discovery, &added, &removed, namespace)
                .await
            {
                tracing::warn!(error = %err, "failed to reconcile endpoints from workflow diff");
            }
        }

        for workflow in &workflows {
            if let Err(err) = self.versioning.record_if_changed(workflow).await {
                tracing::warn!(workflow = %workflow.name(), error = %err, "failed to record workflow version");
            }
        }

        if let Some(labels) = &self.labels {
            self.sync_labels(labels.as_ref(), &workflows, namespace).await;
        }
    }

    async fn sync_labels(
        &self,
        labels: &dyn LabelRepository,
        workflows: &[crate::model::WorkflowResource],
        namespace: Option<&str>,
    ) {
        let now = chrono::Utc::now();
        let mut workflow_names = Vec::new();
        for workflow in workflows {
            workflow_names.push(workflow.name());
            let upsert = labels.upsert_workflow_labels(WorkflowLabels {
                workflow_name: workflow.name(),
                namespace: workflow.namespace(),
                tags: workflow.spec.tags.clone(),
                categories: workflow.spec.categories.clone(),
                synced_at: now,
            });
            if let Err(err) = upsert.await {
                tracing::warn!(workflow = %workflow.name(), error = %err, "failed to upsert workflow labels");
            }
        }

        let tasks = self.discovery.discover_tasks(namespace).await.unwrap_or_default();
        let mut task_names = Vec::new();
        for task in &tasks {
            task_names.push(task.name());
            let upsert = labels.upsert_task_labels(TaskLabels {
                task_name: task.name(),
                namespace: task.metadata.namespace_or_default(),
                tags: task.spec.tags.clone(),
                category: task.spec.category.clone(),
                synced_at: now,
            });
            if let Err(err) = upsert.await {
                tracing::warn!(task = %task.name(), error = %err, "failed to upsert task labels");
            }
        }

        if let Err(err) = labels.delete_missing(&workflow_names, &task_names).await {
            tracing::warn!(error = %err, "failed to prune stale labels");
        }
        if let Err(err) = labels.recompute_usage_stats().await {
            tracing::warn!(error = %err, "failed to recompute label usage stats");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceMetadata, TaskStep, WorkflowSpec};
    use crate::registry::ResourceRegistryClient;
    use crate::repository::mem::InMemoryVersionRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticRegistry {
        workflows: Vec<crate::model::WorkflowResource>,
    }

    #[async_trait]
    impl ResourceRegistryClient for StaticRegistry {
        async fn list_workflows(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<crate::model::WorkflowResource>> {
            Ok(self.workflows.clone())
        }

        async fn list_tasks(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<crate::model::WorkflowTaskResource>> {
            Ok(vec![])
        }
    }

    /// Returns a different response each call, so successive ticks see
    /// a changing discovered set without re-creating the watcher.
    struct SequencedRegistry {
        calls: AtomicUsize,
        responses: Vec<Vec<crate::model::WorkflowResource>>,
    }

    #[async_trait]
    impl ResourceRegistryClient for SequencedRegistry {
        async fn list_workflows(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<crate::model::WorkflowResource>> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.get(idx).cloned().unwrap_or_default())
        }

        async fn list_tasks(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<crate::model::WorkflowTaskResource>> {
            Ok(vec![])
        }
    }

    fn wf(name: &str) -> crate::model::WorkflowResource {
        crate::model::WorkflowResource {
            metadata: ResourceMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: vec![TaskStep {
                    id: "t0".to_string(),
                    task_ref: "noop".to_string(),
                    depends_on: vec![],
                    input: Default::default(),
                }],
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn tick_registers_endpoints_and_records_first_version() {
        let registry = Arc::new(StaticRegistry {
            workflows: vec![wf("greet")],
        });
        let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(0)));
        let endpoints = Arc::new(EndpointRegistry::new());
        let blast_radius = Arc::new(BlastRadiusIndex::new());
        let versioning = Arc::new(VersioningService::new(Arc::new(InMemoryVersionRepository::new())));
        let watcher = WatcherLoop::new(
            discovery,
            endpoints.clone(),
            blast_radius.clone(),
            versioning,
            None,
            None,
            Duration::from_secs(10),
        );

        watcher.tick().await;

        assert!(endpoints.is_registered("greet"));
        assert_eq!(blast_radius.blast_radius("noop"), vec!["greet".to_string()]);
    }

    #[tokio::test]
    async fn second_tick_unregisters_a_workflow_no_longer_discovered() {
        let registry = Arc::new(SequencedRegistry {
            calls: AtomicUsize::new(0),
            responses: vec![vec![wf("greet")], vec![]],
        });
        let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(0)));
        let endpoints = Arc::new(EndpointRegistry::new());
        let blast_radius = Arc::new(BlastRadiusIndex::new());
        let versioning = Arc::new(VersioningService::new(Arc::new(InMemoryVersionRepository::new())));
        let watcher = WatcherLoop::new(
            discovery,
            endpoints.clone(),
            blast_radius,
            versioning,
            None,
            None,
            Duration::from_secs(10),
        );

        watcher.tick().await;
        assert!(endpoints.is_registered("greet"));

        watcher.tick().await;
        assert!(!endpoints.is_registered("greet"));
    }

    #[tokio::test]
    async fn cyclic_workflow_is_skipped_and_never_registered() {
        let cyclic = crate::model::WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("broken".to_string()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: vec![
                    TaskStep {
                        id: "a".to_string(),
                        task_ref: "noop".to_string(),
                        depends_on: vec!["b".to_string()],
                        input: Default::default(),
                    },
                    TaskStep {
                        id: "b".to_string(),
                        task_ref: "noop".to_string(),
                        depends_on: vec!["a".to_string()],
                        input: Default::default(),
                    },
                ],
                ..Default::default()
            },
        };
        let registry = Arc::new(StaticRegistry {
            workflows: vec![cyclic, wf("greet")],
        });
        let discovery = Arc::new(DiscoveryCache::new(registry, Duration::from_secs(0)));
        let endpoints = Arc::new(EndpointRegistry::new());
        let blast_radius = Arc::new(BlastRadiusIndex::new());
        let versioning = Arc::new(VersioningService::new(Arc::new(InMemoryVersionRepository::new())));
        let watcher = WatcherLoop::new(
            discovery,
            endpoints.clone(),
            blast_radius,
            versioning,
            None,
            None,
            Duration::from_secs(10),
        );

        watcher.tick().await;

        assert!(!endpoints.is_registered("broken"));
        assert!(endpoints.is_registered("greet"));
    }
}
