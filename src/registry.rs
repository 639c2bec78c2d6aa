//! The resource registry client contract and a reference in-memory
//! implementation.
//!
//! The real registry (a Kubernetes-style API) is an external
//! collaborator (spec §1): this crate only needs `list(kind,
//! namespace)`. `InMemoryRegistryClient` exists so the gateway is
//! runnable and testable without a live cluster — it is seeded from
//! YAML documents via [`crate::yaml`].

use crate::model::{WorkflowResource, WorkflowTaskResource};
use async_trait::async_trait;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("registry unavailable: {message}"))]
    Unavailable { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// `namespace = None` ("all namespaces") must be a distinct key from
/// `Some("default")` everywhere this is used as a cache/store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespaceKey {
    All,
    Named(String),
}

impl NamespaceKey {
    #[must_use]
    pub fn from_option(namespace: Option<&str>) -> Self {
        match namespace {
            None => NamespaceKey::All,
            Some(ns) => NamespaceKey::Named(ns.to_string()),
        }
    }
}

#[async_trait]
pub trait ResourceRegistryClient: Send + Sync {
    async fn list_workflows(&self, namespace: Option<&str>) -> Result<Vec<WorkflowResource>>;
    async fn list_tasks(&self, namespace: Option<&str>) -> Result<Vec<WorkflowTaskResource>>;
}

/// Reference registry client backed by process memory. Namespace
/// filtering is applied in-process since the store is unpartitioned.
#[derive(Debug, Default)]
pub struct InMemoryRegistryClient {
    workflows: RwLock<HashMap<String, WorkflowResource>>,
    tasks: RwLock<HashMap<String, WorkflowTaskResource>>,
}

impl InMemoryRegistryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_workflow(&self, workflow: WorkflowResource) {
        let key = format!("{}/{}", workflow.namespace(), workflow.name());
        self.workflows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, workflow);
    }

    pub fn remove_workflow(&self, namespace: &str, name: &str) {
        let key = format!("{namespace}/{name}");
        self.workflows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&key);
    }

    pub fn upsert_task(&self, task: WorkflowTaskResource) {
        let namespace = task.metadata.namespace_or_default();
        let key = format!("{}/{}", namespace, task.name());
        self.tasks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, task);
    }
}

#[derive(Debug, Snafu)]
pub enum SeedError {
    #[snafu(display("failed to read directory {path}: {source}"))]
    ReadDir { path: String, source: std::io::Error },
    #[snafu(display("failed to read {path}: {source}"))]
    ReadFile { path: String, source: std::io::Error },
    #[snafu(display("{path}: {source}"))]
    Parse {
        path: String,
        source: crate::yaml::YamlParseException,
    },
}

fn yaml_files(dir: &std::path::Path) -> std::result::Result<Vec<std::path::PathBuf>, SeedError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).context(ReadDirSnafu {
        path: dir.display().to_string(),
    })?;
    let mut files: Vec<std::path::PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Loads `{dir}/workflows/*.yaml` and `{dir}/tasks/*.yaml` into
/// `registry` once, at process startup. Missing subdirectories are
/// treated as "no resources of that kind" rather than an error.
pub fn seed_from_directory(
    registry: &InMemoryRegistryClient,
    dir: &str,
) -> std::result::Result<(), SeedError> {
    let base = std::path::Path::new(dir);

    for path in yaml_files(&base.join("workflows"))? {
        let text = std::fs::read_to_string(&path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        let workflow = crate::yaml::parse_workflow(&text).context(ParseSnafu {
            path: path.display().to_string(),
        })?;
        registry.upsert_workflow(workflow);
    }

    for path in yaml_files(&base.join("tasks"))? {
        let text = std::fs::read_to_string(&path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        let task = crate::yaml::parse_task(&text).context(ParseSnafu {
            path: path.display().to_string(),
        })?;
        registry.upsert_task(task);
    }

    Ok(())
}

#[async_trait]
impl ResourceRegistryClient for InMemoryRegistryClient {
    async fn list_workflows(&self, namespace: Option<&str>) -> Result<Vec<WorkflowResource>> {
        let workflows = self
            .workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(workflows
            .values()
            .filter(|w| namespace.is_none_or(|ns| w.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, namespace: Option<&str>) -> Result<Vec<WorkflowTaskResource>> {
        let tasks = self
            .tasks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(tasks
            .values()
            .filter(|t| namespace.is_none_or(|ns| t.metadata.namespace_or_default() == ns))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod seed_tests {
    use super::*;

    #[tokio::test]
    async fn seeds_workflows_and_tasks_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workflows")).unwrap();
        std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
        std::fs::write(
            dir.path().join("workflows/greet.yaml"),
            "metadata:\n  name: greet\nspec:\n  tasks: []\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("tasks/http-call.yaml"),
            "metadata:\n  name: http-call\nspec:\n  type: http\n",
        )
        .unwrap();

        let registry = InMemoryRegistryClient::new();
        seed_from_directory(&registry, dir.path().to_str().unwrap()).unwrap();

        assert_eq!(registry.list_workflows(None).await.unwrap().len(), 1);
        assert_eq!(registry.list_tasks(None).await.unwrap().len(), 1);
    }

    #[test]
    fn missing_subdirectories_are_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = InMemoryRegistryClient::new();
        assert!(seed_from_directory(&registry, dir.path().to_str().unwrap()).is_ok());
    }
}
