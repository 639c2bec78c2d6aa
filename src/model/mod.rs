//! Shared data shapes for the gateway: resources consumed from the
//! registry, and the records this process owns and persists.

pub mod baseline;
pub mod execution;
pub mod labels;
pub mod resource;
pub mod version;

pub use baseline::{AnomalyEvent, AnomalyThresholds, Baseline, Severity};
pub use execution::{
    ExecutionRecord, ExecutionResponse, ExecutionStatus, ExecutionTrace, TaskErrorInfo,
    TaskErrorType, TaskExecutionRecord, TaskStatus, ValidationError, ValidationResult,
};
pub use labels::{LabelEntityType, LabelKind, LabelUsageStat, TaskLabels, WorkflowLabels};
pub use resource::{
    DagError, InputParameter, ResourceMetadata, TaskStep, TriggerSpec, WorkflowResource,
    WorkflowSpec, WorkflowTaskResource, WorkflowTaskSpec,
};
pub use version::{content_hash, WorkflowVersion};
