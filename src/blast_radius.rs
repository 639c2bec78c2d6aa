//! In-memory blast-radius index: which workflows reference which
//! tasks. Rebuilt on every successful discovery; process lifetime only.

use crate::model::WorkflowResource;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct BlastRadiusIndex {
    used_by: DashMap<String, HashSet<String>>,
    contains: DashMap<String, HashSet<String>>,
}

impl BlastRadiusIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index from a fresh discovery snapshot.
    pub fn rebuild(&self, workflows: &[WorkflowResource]) {
        self.used_by.clear();
        self.contains.clear();
        for workflow in workflows {
            let workflow_name = workflow.name();
            let mut refs = HashSet::new();
            for task in &workflow.spec.tasks {
                let key = task.task_ref.to_lowercase();
                self.used_by
                    .entry(key)
                    .or_default()
                    .insert(workflow_name.clone());
                refs.insert(task.task_ref.clone());
            }
            self.contains.insert(workflow_name, refs);
        }
    }

    /// Workflows affected by a change to `task_ref`, case-insensitive.
    #[must_use]
    pub fn blast_radius(&self, task_ref: &str) -> Vec<String> {
        self.used_by
            .get(&task_ref.to_lowercase())
            .map(|set| {
                let mut names: Vec<String> = set.iter().cloned().collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn task_refs_for(&self, workflow_name: &str) -> Vec<String> {
        self.contains
            .get(workflow_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceMetadata, TaskStep, WorkflowSpec};

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

    #[test]
    fn task_referenced_by_n_workflows_returns_exactly_those_names() {
        let index = BlastRadiusIndex::new();
        index.rebuild(&[
            wf("w1", &["SendEmail"]),
            wf("w2", &["sendemail"]),
            wf("w3", &["other"]),
        ]);
        let mut radius = index.blast_radius("SENDEMAIL");
        radius.sort();
        assert_eq!(radius, vec!["w1".to_string(), "w2".to_string()]);
    }

    #[test]
    fn rebuild_replaces_prior_state() {
        let index = BlastRadiusIndex::new();
        index.rebuild(&[wf("w1", &["a"])]);
        index.rebuild(&[wf("w2", &["b"])]);
        assert!(index.blast_radius("a").is_empty());
        assert_eq!(index.blast_radius("b"), vec!["w2".to_string()]);
    }
}
