//! §4.5 Schedule trigger loop — polls discovered workflows for
//! `schedule` triggers and fires [`ExecutionService::start_execution`]
//! when a cron expression is due, with a per-`(workflow, trigger)`
//! `lastRunAt` guard set before the run completes so two overlapping
//! ticks never double-fire the same schedule.

use crate::execution::ExecutionService;
use crate::model::{TriggerSpec, WorkflowResource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScheduleKey {
    workflow_name: String,
    trigger_index: usize,
}

pub struct ScheduleLoop {
    discovery: Arc<crate::discovery::DiscoveryCache>,
    execution: Arc<ExecutionService>,
    namespace: Option<String>,
    poll_interval: Duration,
    last_run_at: DashMap<ScheduleKey, DateTime<Utc>>,
}

impl ScheduleLoop {
    #[must_use]
    pub fn new(
        discovery: Arc<crate::discovery::DiscoveryCache>,
        execution: Arc<ExecutionService>,
        namespace: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            discovery,
            execution,
            namespace,
            poll_interval,
            last_run_at: DashMap::new(),
        }
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            self.tick().await;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancellation.cancelled() => return,
            }
        }
    }

    async fn tick(&self) {
        let workflows = match self.discovery.discover_workflows(self.namespace.as_deref()).await {
            Ok(workflows) => workflows,
            Err(err) => {
                tracing::error!(error = %err, "discovery failed during schedule tick");
                return;
            }
        };

        let now = Utc::now();
        for workflow in &workflows {
            for (index, trigger) in workflow.spec.triggers.iter().enumerate() {
                self.maybe_fire(workflow, index, trigger, now).await;
            }
        }
    }

    async fn maybe_fire(
        &self,
        workflow: &WorkflowResource,
        trigger_index: usize,
        trigger: &TriggerSpec,
        now: DateTime<Utc>,
    ) {
        let TriggerSpec::Schedule { cron: expr, enabled, input } = trigger else {
            return;
        };
        if !enabled {
            return;
        }

        let schedule = match cron::Schedule::from_str(expr) {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::warn!(workflow = %workflow.name(), cron = %expr, error = %err, "skipping invalid cron expression");
                return;
            }
        };

        let key = ScheduleKey {
            workflow_name: workflow.name(),
            trigger_index,
        };
        let since = self
            .last_run_at
            .get(&key)
            .map(|r| *r)
            .unwrap_or_else(|| now - chrono::Duration::seconds(self.poll_interval.as_secs() as i64));

        let due = schedule
            .after(&since)
            .take_while(|occurrence| *occurrence <= now)
            .next()
            .is_some();
        if !due {
            return;
        }

        // Set before the execution starts so a slow run never lets a
        // concurrent tick observe a stale `lastRunAt` and re-fire.
        self.last_run_at.insert(key, now);

        let input_value = serde_json::Value::Object(
            input
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        match self
            .execution
            .start_execution(&workflow.name(), Some(&workflow.namespace()), input_value)
            .await
        {
            Ok(execution_id) => {
                tracing::info!(workflow = %workflow.name(), %execution_id, "schedule trigger fired");
            }
            Err(err) => {
                tracing::error!(workflow = %workflow.name(), error = %err, "scheduled execution failed to start");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceMetadata, WorkflowSpec};

    fn wf_with_trigger(name: &str, cron_expr: &str, enabled: bool) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: WorkflowSpec {
                triggers: vec![TriggerSpec::Schedule {
                    cron: cron_expr.to_string(),
                    enabled,
                    input: Default::default(),
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn disabled_trigger_is_never_due() {
        let workflow = wf_with_trigger("greet", "* * * * * *", false);
        let TriggerSpec::Schedule { enabled, .. } = &workflow.spec.triggers[0] else {
            unreachable!()
        };
        assert!(!enabled);
    }

    #[test]
    fn invalid_cron_expression_is_rejected_by_the_parser() {
        assert!(cron::Schedule::from_str("not a cron expression").is_err());
    }

    #[test]
    fn schedule_key_distinguishes_trigger_index() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ScheduleKey {
            workflow_name: "greet".to_string(),
            trigger_index: 0,
        });
        set.insert(ScheduleKey {
            workflow_name: "greet".to_string(),
            trigger_index: 1,
        });
        assert_eq!(set.len(), 2);
    }
}
