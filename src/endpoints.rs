//! §4.2 Dynamic Endpoint Registry — the set of HTTP endpoints
//! synthesized for each discovered workflow.
//!
//! Per the REDESIGN FLAGS, this is a lock-free concurrent map
//! (`dashmap`) keyed by lowercased workflow name, each value an
//! immutable triple of endpoints swapped in atomically on replace
//! rather than mutated field-by-field.

use crate::discovery::DiscoveryCache;
use crate::model::WorkflowResource;
use dashmap::DashMap;
use snafu::prelude::*;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("workflow is missing metadata, cannot register endpoints"))]
    MissingMetadata,

    #[snafu(display("discovery error: {source}"))]
    Discovery { source: crate::discovery::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::discovery::Error> for Error {
    fn from(source: crate::discovery::Error) -> Self {
        Error::Discovery { source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Execute,
    Test,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub method: HttpMethod,
    pub path: String,
    pub workflow_name: String,
}

/// The three endpoints synthesized for a single workflow. An
/// immutable unit: `register` swaps the whole triple in one atomic
/// map insert, never mutating an existing entry's fields.
#[derive(Debug, Clone)]
pub struct EndpointTriple {
    pub execute: Endpoint,
    pub test: Endpoint,
    pub get: Endpoint,
}

impl EndpointTriple {
    fn for_workflow(name: &str) -> Self {
        Self {
            execute: Endpoint {
                kind: EndpointKind::Execute,
                method: HttpMethod::Post,
                path: format!("/api/v1/workflows/{name}/execute"),
                workflow_name: name.to_string(),
            },
            test: Endpoint {
                kind: EndpointKind::Test,
                method: HttpMethod::Post,
                path: format!("/api/v1/workflows/{name}/test"),
                workflow_name: name.to_string(),
            },
            get: Endpoint {
                kind: EndpointKind::Get,
                method: HttpMethod::Get,
                path: format!("/api/v1/workflows/{name}"),
                workflow_name: name.to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    entries: DashMap<String, EndpointTriple>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing entry for this workflow's name with a
    /// fresh triple, atomically.
    pub fn register(&self, workflow: &WorkflowResource) -> Result<()> {
        if workflow.metadata.name.is_none() {
            return Err(Error::MissingMetadata);
        }
        let key = workflow.name().to_lowercase();
        self.entries.insert(key, EndpointTriple::for_workflow(&workflow.name()));
        Ok(())
    }

    /// No-op when the workflow is not registered.
    pub fn unregister(&self, name: &str) {
        self.entries.remove(&name.to_lowercase());
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<EndpointTriple> {
        self.entries.get(&name.to_lowercase()).map(|e| e.clone())
    }

    /// Lowercased names of every workflow currently registered.
    #[must_use]
    pub fn registered_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn count_for(&self, name: &str) -> usize {
        if self.is_registered(name) {
            3
        } else {
            0
        }
    }

    pub async fn sync_all(&self, discovery: &DiscoveryCache, namespace: Option<&str>) -> Result<()> {
        let workflows = discovery.discover_workflows(namespace).await?;
        for workflow in &workflows {
            self.register(workflow)?;
        }
        Ok(())
    }

    /// Reconcile from a `workflows_changed` event: register newly
    /// added workflows (fetched by name; a miss is skipped rather than
    /// failing the whole batch) and unregister removed ones.
    pub async fn on_workflows_changed(
        &self,
        discovery: &DiscoveryCache,
        added: &[String],
        removed: &[String],
        namespace: Option<&str>,
    ) -> Result<()> {
        for name in added {
            if let Some(workflow) = discovery.get_workflow_by_name(name, namespace).await? {
                self.register(&workflow)?;
            }
        }
        for name in removed {
            self.unregister(name);
        }
        Ok(())
    }
}

pub type SharedEndpointRegistry = Arc<EndpointRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceMetadata;

    fn wf(name: &str) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Default::default(),
        }
    }

    #[test]
    fn register_creates_exactly_three_endpoints() {
        let registry = EndpointRegistry::new();
        registry.register(&wf("w1")).unwrap();
        registry.register(&wf("w1")).unwrap();
        registry.register(&wf("w1")).unwrap();
        assert_eq!(registry.count_for("w1"), 3);
    }

    #[test]
    fn unregister_is_noop_on_absence() {
        let registry = EndpointRegistry::new();
        registry.unregister("missing");
        assert_eq!(registry.count_for("missing"), 0);
    }

    #[test]
    fn register_fails_without_metadata_name() {
        let registry = EndpointRegistry::new();
        let workflow = WorkflowResource {
            metadata: ResourceMetadata::default(),
            spec: Default::default(),
        };
        assert!(matches!(registry.register(&workflow), Err(Error::MissingMetadata)));
    }

    #[test]
    fn replacement_is_atomic_triple_swap() {
        let registry = EndpointRegistry::new();
        registry.register(&wf("W1")).unwrap();
        assert!(registry.is_registered("w1"));
        registry.register(&wf("w1")).unwrap();
        assert_eq!(registry.count_for("w1"), 3);
    }
}
