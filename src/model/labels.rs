//! Tag/category aggregates synced from discovered resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLabels {
    pub workflow_name: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLabels {
    pub task_name: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelEntityType {
    Workflow,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    Tag,
    Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelUsageStat {
    pub entity_type: LabelEntityType,
    pub label_kind: LabelKind,
    pub label_value: String,
    pub usage_count: i64,
}
