//! §4.1 Discovery & Cache — a lazily-refreshed, TTL-bounded view of the
//! resource set per `(kind, namespace)`, with change notification.

use crate::model::{WorkflowResource, WorkflowTaskResource};
use crate::registry::{NamespaceKey, ResourceRegistryClient};
use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("registry error: {source}"))]
    Registry { source: crate::registry::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::registry::Error> for Error {
    fn from(source: crate::registry::Error) -> Self {
        Error::Registry { source }
    }
}

/// Emitted whenever a refresh that actually hit the registry changes
/// the set of workflow names. Suppressed on cache hits and on
/// no-op refreshes.
#[derive(Debug, Clone)]
pub struct WorkflowsChanged {
    pub namespace: Option<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

struct CacheEntry<T> {
    data: Arc<Vec<T>>,
    fetched_at: DateTime<Utc>,
}

/// Per-`(kind, namespace)` TTL cache with single-flight refresh.
///
/// `namespace = null` ("all namespaces") and `namespace = "default"`
/// are distinct cache entries, enforced by keying on [`NamespaceKey`]
/// rather than on a normalized string.
pub struct DiscoveryCache {
    registry: Arc<dyn ResourceRegistryClient>,
    ttl: Duration,
    workflows: RwLock<HashMap<NamespaceKey, CacheEntry<WorkflowResource>>>,
    tasks: RwLock<HashMap<NamespaceKey, CacheEntry<WorkflowTaskResource>>>,
    // Single-flight locks, one per namespace key, to avoid a thundering
    // herd of concurrent refreshes against the registry.
    workflow_refresh_locks: Mutex<HashMap<NamespaceKey, Arc<Mutex<()>>>>,
    task_refresh_locks: Mutex<HashMap<NamespaceKey, Arc<Mutex<()>>>>,
    changed_tx: broadcast::Sender<WorkflowsChanged>,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(registry: Arc<dyn ResourceRegistryClient>, ttl: Duration) -> Self {
        let (changed_tx, _) = broadcast::channel(256);
        Self {
            registry,
            ttl,
            workflows: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            workflow_refresh_locks: Mutex::new(HashMap::new()),
            task_refresh_locks: Mutex::new(HashMap::new()),
            changed_tx,
        }
    }

    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<WorkflowsChanged> {
        self.changed_tx.subscribe()
    }

    pub async fn discover_workflows(&self, namespace: Option<&str>) -> Result<Vec<WorkflowResource>> {
        let key = NamespaceKey::from_option(namespace);

        if let Some(cached) = self.fresh_workflows(&key).await {
            return Ok((*cached).clone());
        }

        let lock = self.per_key_lock(&self.workflow_refresh_locks, &key).await;
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = self.fresh_workflows(&key).await {
            return Ok((*cached).clone());
        }

        let previous_names: HashSet<String> = {
            let workflows = self.workflows.read().await;
            workflows
                .get(&key)
                .map(|entry| names(&entry.data))
                .unwrap_or_default()
        };

        let fetched = self.registry.list_workflows(namespace).await?;
        let new_names = names_from_slice(&fetched);

        {
            let mut workflows = self.workflows.write().await;
            workflows.insert(
                key.clone(),
                CacheEntry {
                    data: Arc::new(fetched.clone()),
                    fetched_at: Utc::now(),
                },
            );
        }

        let added: Vec<String> = new_names.difference(&previous_names).cloned().collect();
        let removed: Vec<String> = previous_names.difference(&new_names).cloned().collect();
        if !added.is_empty() || !removed.is_empty() {
            let _ = self.changed_tx.send(WorkflowsChanged {
                namespace: namespace.map(str::to_string),
                added,
                removed,
            });
        }

        Ok(fetched)
    }

    pub async fn discover_tasks(&self, namespace: Option<&str>) -> Result<Vec<WorkflowTaskResource>> {
        let key = NamespaceKey::from_option(namespace);

        if let Some(cached) = self.fresh_tasks(&key).await {
            return Ok((*cached).clone());
        }

        let lock = self.per_key_lock(&self.task_refresh_locks, &key).await;
        let _guard = lock.lock().await;

        if let Some(cached) = self.fresh_tasks(&key).await {
            return Ok((*cached).clone());
        }

        let fetched = self.registry.list_tasks(namespace).await?;
        let mut tasks = self.tasks.write().await;
        tasks.insert(
            key,
            CacheEntry {
                data: Arc::new(fetched.clone()),
                fetched_at: Utc::now(),
            },
        );
        Ok(fetched)
    }

    pub async fn get_workflow_by_name(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<WorkflowResource>> {
        let workflows = self.discover_workflows(namespace).await?;
        Ok(workflows
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(name)))
    }

    async fn fresh_workflows(&self, key: &NamespaceKey) -> Option<Arc<Vec<WorkflowResource>>> {
        let workflows = self.workflows.read().await;
        let entry = workflows.get(key)?;
        if Utc::now().signed_duration_since(entry.fetched_at) < chrono::Duration::from_std(self.ttl).ok()? {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    async fn fresh_tasks(&self, key: &NamespaceKey) -> Option<Arc<Vec<WorkflowTaskResource>>> {
        let tasks = self.tasks.read().await;
        let entry = tasks.get(key)?;
        if Utc::now().signed_duration_since(entry.fetched_at) < chrono::Duration::from_std(self.ttl).ok()? {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    async fn per_key_lock(
        &self,
        locks: &Mutex<HashMap<NamespaceKey, Arc<Mutex<()>>>>,
        key: &NamespaceKey,
    ) -> Arc<Mutex<()>> {
        let mut locks = locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

fn names(resources: &[WorkflowResource]) -> HashSet<String> {
    names_from_slice(resources)
}

fn names_from_slice(resources: &[WorkflowResource]) -> HashSet<String> {
    resources
        .iter()
        .filter_map(|w| w.metadata.name.clone())
        .filter(|n| !n.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SequencedRegistry {
        calls: AtomicUsize,
        responses: Vec<Vec<WorkflowResource>>,
    }

    fn workflow(name: &str) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Default::default(),
        }
    }

    #[async_trait]
    impl ResourceRegistryClient for SequencedRegistry {
        async fn list_workflows(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<WorkflowResource>> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.get(idx).cloned().unwrap_or_default())
        }

        async fn list_tasks(
            &self,
            _namespace: Option<&str>,
        ) -> crate::registry::Result<Vec<WorkflowTaskResource>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn added_workflow_fires_one_change_event() {
        let registry = Arc::new(SequencedRegistry {
            calls: AtomicUsize::new(0),
            responses: vec![vec![], vec![workflow("w1")]],
        });
        let cache = DiscoveryCache::new(registry, Duration::from_secs(0));
        let mut rx = cache.subscribe_changes();

        cache.discover_workflows(None).await.unwrap();
        cache.discover_workflows(None).await.unwrap();

        let event = rx.try_recv().expect("expected one change event");
        assert_eq!(event.added, vec!["w1".to_string()]);
        assert!(event.removed.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ttl_hit_suppresses_registry_call() {
        let registry = Arc::new(SequencedRegistry {
            calls: AtomicUsize::new(0),
            responses: vec![vec![workflow("w1")], vec![workflow("w1"), workflow("w2")]],
        });
        let cache = DiscoveryCache::new(registry, Duration::from_secs(3600));

        cache.discover_workflows(None).await.unwrap();
        let second = cache.discover_workflows(None).await.unwrap();

        assert_eq!(second.len(), 1, "second call should be served from cache");
    }

    #[tokio::test]
    async fn null_and_default_namespace_are_distinct_keys() {
        assert_ne!(
            NamespaceKey::from_option(None),
            NamespaceKey::from_option(Some("default"))
        );
    }

    #[tokio::test]
    async fn unchanged_set_suppresses_event() {
        let registry = Arc::new(SequencedRegistry {
            calls: AtomicUsize::new(0),
            responses: vec![vec![workflow("w1")], vec![workflow("w1")]],
        });
        let cache = DiscoveryCache::new(registry, Duration::from_secs(0));
        let mut rx = cache.subscribe_changes();

        cache.discover_workflows(None).await.unwrap();
        cache.discover_workflows(None).await.unwrap();

        assert!(rx.try_recv().is_err());
    }
}
