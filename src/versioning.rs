//! Appends a new [`WorkflowVersion`] whenever a discovered workflow's
//! spec content hash differs from the latest recorded revision.
//! Grounded on the teacher's `cache.rs` `compute_cache_key`
//! change-detection idiom, applied here to whole workflow specs
//! instead of task inputs.

use crate::model::{content_hash, WorkflowResource, WorkflowVersion};
use crate::repository::WorkflowVersionRepository;
use snafu::prelude::*;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("repository error: {source}"))]
    Repository { source: crate::repository::Error },

    #[snafu(display("failed to serialize workflow spec: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct VersioningService {
    versions: Arc<dyn WorkflowVersionRepository>,
}

impl VersioningService {
    #[must_use]
    pub fn new(versions: Arc<dyn WorkflowVersionRepository>) -> Self {
        Self { versions }
    }

    /// Returns `true` if a new version was recorded.
    pub async fn record_if_changed(&self, workflow: &WorkflowResource) -> Result<bool> {
        let spec_snapshot = serde_json::to_value(&workflow.spec).context(SerializationSnafu)?;
        let hash = content_hash(&spec_snapshot);

        let latest = self
            .versions
            .latest(&workflow.name())
            .await
            .context(RepositorySnafu)?;

        if latest.as_ref().is_some_and(|v| v.content_hash == hash) {
            return Ok(false);
        }

        let next_revision = latest.map_or(1, |v| v.revision + 1);
        self.versions
            .append(WorkflowVersion {
                workflow_name: workflow.name(),
                revision: next_revision,
                captured_at: chrono::Utc::now(),
                content_hash: hash,
                spec_snapshot,
            })
            .await
            .context(RepositorySnafu)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceMetadata, TaskStep, WorkflowSpec};
    use crate::repository::mem::InMemoryVersionRepository;

    fn wf(name: &str, task_refs: &[&str]) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: task_refs
                    .iter()
                    .enumerate()
                    .map(|(i, r)| TaskStep {
                        id: format!("t{i}"),
                        task_ref: (*r).to_string(),
                        depends_on: vec![],
                        input: Default::default(),
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn first_observation_records_revision_one() {
        let svc = VersioningService::new(Arc::new(InMemoryVersionRepository::new()));
        assert!(svc.record_if_changed(&wf("greet", &["a"])).await.unwrap());
    }

    #[tokio::test]
    async fn unchanged_spec_does_not_append() {
        let repo = Arc::new(InMemoryVersionRepository::new());
        let svc = VersioningService::new(repo.clone());
        let workflow = wf("greet", &["a"]);
        assert!(svc.record_if_changed(&workflow).await.unwrap());
        assert!(!svc.record_if_changed(&workflow).await.unwrap());
        assert_eq!(repo.list("greet").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn changed_spec_bumps_revision() {
        let repo = Arc::new(InMemoryVersionRepository::new());
        let svc = VersioningService::new(repo.clone());
        svc.record_if_changed(&wf("greet", &["a"])).await.unwrap();
        assert!(svc.record_if_changed(&wf("greet", &["b"])).await.unwrap());
        let versions = repo.list("greet").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].revision, 2);
    }
}
