//! Declarative resource shapes consumed read-only from the registry.
//!
//! These mirror the Kubernetes-style resources described in the spec: a
//! `WorkflowResource` describes a task DAG, a `WorkflowTaskResource`
//! describes one invocable unit. Both carry a `metadata` block and a
//! `spec` block, matching the registry's wire shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ResourceMetadata {
    #[must_use]
    pub fn name_or_unknown(&self) -> String {
        self.name.clone().unwrap_or_else(|| "unknown".to_string())
    }

    #[must_use]
    pub fn namespace_or_default(&self) -> String {
        self.namespace.clone().unwrap_or_else(|| "default".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputParameter {
    #[serde(rename = "type", default)]
    pub param_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "default", default)]
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStep {
    pub id: String,
    #[serde(rename = "taskRef")]
    pub task_ref: String,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerSpec {
    #[serde(rename_all = "camelCase")]
    Schedule {
        cron: String,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        input: BTreeMap<String, serde_json::Value>,
    },
    /// Any trigger kind this core does not recognize. Preserved for
    /// round-tripping but never acted upon.
    #[serde(other)]
    Other,
}

fn default_true() -> bool {
    true
}

impl Eq for TriggerSpec {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub input: BTreeMap<String, InputParameter>,
    #[serde(default)]
    pub tasks: Vec<TaskStep>,
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowResource {
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub spec: WorkflowSpec,
}

impl WorkflowResource {
    #[must_use]
    pub fn name(&self) -> String {
        self.metadata.name_or_unknown()
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        self.metadata.namespace_or_default()
    }

    /// Find a `TaskStep` by id.
    #[must_use]
    pub fn task_step(&self, id: &str) -> Option<&TaskStep> {
        self.spec.tasks.iter().find(|t| t.id == id)
    }

    /// Validate that `id`s are unique and `dependsOn` forms a DAG over
    /// preceding ids only. Returns the offending task id on failure.
    pub fn validate_dag(&self) -> Result<(), DagError> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.spec.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(DagError::DuplicateId { id: task.id.clone() });
            }
        }
        for task in &self.spec.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(DagError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        if has_cycle(&self.spec.tasks) {
            return Err(DagError::Cycle);
        }
        Ok(())
    }
}

fn has_cycle(tasks: &[TaskStep]) -> bool {
    use std::collections::HashMap;
    let mut state: HashMap<&str, u8> = HashMap::new();
    let by_id: HashMap<&str, &TaskStep> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a TaskStep>,
        state: &mut HashMap<&'a str, u8>,
    ) -> bool {
        match state.get(id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        state.insert(id, 1);
        if let Some(task) = by_id.get(id) {
            for dep in &task.depends_on {
                if visit(dep.as_str(), by_id, state) {
                    return true;
                }
            }
        }
        state.insert(id, 2);
        false
    }

    tasks.iter().any(|t| visit(t.id.as_str(), &by_id, &mut state))
}

#[derive(Debug, Clone, PartialEq, Eq, snafu::Snafu)]
pub enum DagError {
    #[snafu(display("duplicate task id: {id}"))]
    DuplicateId { id: String },
    #[snafu(display("task {task} depends on unknown task {dependency}"))]
    UnknownDependency { task: String, dependency: String },
    #[snafu(display("workflow task graph contains a cycle"))]
    Cycle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowTaskSpec {
    #[serde(rename = "type", default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowTaskResource {
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub spec: WorkflowTaskSpec,
}

impl WorkflowTaskResource {
    #[must_use]
    pub fn name(&self) -> String {
        self.metadata.name_or_unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> TaskStep {
        TaskStep {
            id: id.to_string(),
            task_ref: "noop".to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            input: BTreeMap::new(),
        }
    }

    #[test]
    fn detects_duplicate_ids() {
        let wf = WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("w".into()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: vec![step("a", &[]), step("a", &[])],
                ..Default::default()
            },
        };
        assert_eq!(
            wf.validate_dag(),
            Err(DagError::DuplicateId { id: "a".to_string() })
        );
    }

    #[test]
    fn detects_cycles() {
        let wf = WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("w".into()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: vec![step("a", &["b"]), step("b", &["a"])],
                ..Default::default()
            },
        };
        assert_eq!(wf.validate_dag(), Err(DagError::Cycle));
    }

    #[test]
    fn accepts_valid_dag() {
        let wf = WorkflowResource {
            metadata: ResourceMetadata {
                name: Some("w".into()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                tasks: vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])],
                ..Default::default()
            },
        };
        assert!(wf.validate_dag().is_ok());
    }
}
