//! §4.4 Event Hub — fan-out of execution progress to per-execution and
//! visualization-wide subscriber groups.
//!
//! Grounded on the teacher's use of `tokio::sync::broadcast` for
//! fan-out (see `durableengine.rs`'s event channel), generalized here
//! to a named-group registry of broadcast senders plus an SSE-facing
//! per-group subscribe call.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const VISUALIZATION_GROUP: &str = "visualization";

fn execution_group(execution_id: Uuid) -> String {
    format!("execution-{execution_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        workflow_name: String,
    },
    TaskStarted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        task_id: String,
        task_name: String,
    },
    TaskCompleted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        task_id: String,
        task_name: String,
        status: String,
        output: Option<serde_json::Value>,
        duration_ms: i64,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        workflow_name: String,
        status: String,
        output: Option<serde_json::Value>,
        duration_ms: i64,
    },
    SignalFlow {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        from_task_id: String,
        to_task_id: String,
    },
    Anomaly {
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        workflow_name: String,
        task_id: Option<String>,
        severity: crate::model::Severity,
        z_score: f64,
    },
}

impl WorkflowEvent {
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { execution_id, .. }
            | WorkflowEvent::TaskStarted { execution_id, .. }
            | WorkflowEvent::TaskCompleted { execution_id, .. }
            | WorkflowEvent::WorkflowCompleted { execution_id, .. }
            | WorkflowEvent::SignalFlow { execution_id, .. }
            | WorkflowEvent::Anomaly { execution_id, .. } => *execution_id,
        }
    }
}

struct Group {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl Group {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

/// Process-wide fan-out hub: one broadcast channel per named group,
/// created lazily on first publish or subscribe. An emit always goes
/// to both the per-execution group and [`VISUALIZATION_GROUP`] — the
/// spec mandates two distinct deliveries, dedup is not performed.
#[derive(Default)]
pub struct EventHub {
    groups: DashMap<String, Group>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<WorkflowEvent> {
        self.groups.entry(group.to_string()).or_insert_with(Group::new).sender.subscribe()
    }

    /// Publish to the per-execution group and the visualization group.
    /// A group with no subscribers silently drops the send (broadcast
    /// semantics); a subscriber lagging behind does not block others.
    pub fn publish(&self, event: WorkflowEvent) {
        let exec_group = execution_group(event.execution_id());
        self.send_to(&exec_group, event.clone());
        self.send_to(VISUALIZATION_GROUP, event);
    }

    fn send_to(&self, group: &str, event: WorkflowEvent) {
        let entry = self.groups.entry(group.to_string()).or_insert_with(Group::new);
        let _ = entry.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_both_groups() {
        let hub = EventHub::new();
        let execution_id = Uuid::new_v4();
        let mut exec_rx = hub.subscribe(&execution_group(execution_id));
        let mut viz_rx = hub.subscribe(VISUALIZATION_GROUP);

        hub.publish(WorkflowEvent::WorkflowStarted {
            execution_id,
            timestamp: Utc::now(),
            workflow_name: "greet".to_string(),
        });

        assert!(exec_rx.try_recv().is_ok());
        assert!(viz_rx.try_recv().is_ok());
    }

    #[test]
    fn events_for_one_execution_are_delivered_in_order() {
        let hub = EventHub::new();
        let execution_id = Uuid::new_v4();
        let mut rx = hub.subscribe(&execution_group(execution_id));

        hub.publish(WorkflowEvent::WorkflowStarted {
            execution_id,
            timestamp: Utc::now(),
            workflow_name: "greet".to_string(),
        });
        hub.publish(WorkflowEvent::TaskStarted {
            execution_id,
            timestamp: Utc::now(),
            task_id: "t1".to_string(),
            task_name: "t1".to_string(),
        });

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(first, WorkflowEvent::WorkflowStarted { .. }));
        assert!(matches!(second, WorkflowEvent::TaskStarted { .. }));
    }

    #[test]
    fn unsubscribed_group_does_not_panic() {
        let hub = EventHub::new();
        hub.publish(WorkflowEvent::WorkflowStarted {
            execution_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            workflow_name: "greet".to_string(),
        });
    }
}
