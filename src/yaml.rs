//! Parses registry YAML documents into validated [`WorkflowResource`]s.
//!
//! Grounded on the teacher's `workflow_source.rs` load-and-parse
//! pattern: a typed error enum, `serde_yaml` doing the deserialization,
//! `serde`'s tolerant-by-default unknown-field handling (fields are
//! simply ignored unless `deny_unknown_fields` is set, which this
//! crate never sets), and `#[serde(alias = ...)]` for lowerCamelCase
//! vs. camelCase key tolerance.

use crate::model::{WorkflowResource, WorkflowTaskResource};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum YamlParseException {
    #[snafu(display("workflow YAML is empty"))]
    Empty,

    #[snafu(display("invalid workflow YAML: {source}"))]
    InvalidSyntax { source: serde_yaml::Error },

    #[snafu(display("workflow is missing metadata.name"))]
    MissingName,
}

pub type Result<T> = std::result::Result<T, YamlParseException>;

/// Parse a single `WorkflowResource` from YAML text.
pub fn parse_workflow(text: &str) -> Result<WorkflowResource> {
    if text.trim().is_empty() {
        return Err(YamlParseException::Empty);
    }

    let workflow: WorkflowResource =
        serde_yaml::from_str(text).context(InvalidSyntaxSnafu)?;

    if workflow.metadata.name.as_deref().unwrap_or("").trim().is_empty() {
        return Err(YamlParseException::MissingName);
    }

    Ok(workflow)
}

/// Parse a single `WorkflowTaskResource` from YAML text.
pub fn parse_task(text: &str) -> Result<WorkflowTaskResource> {
    if text.trim().is_empty() {
        return Err(YamlParseException::Empty);
    }

    let task: WorkflowTaskResource = serde_yaml::from_str(text).context(InvalidSyntaxSnafu)?;

    if task.metadata.name.as_deref().unwrap_or("").trim().is_empty() {
        return Err(YamlParseException::MissingName);
    }

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
metadata:
  name: greet
  namespace: demo
spec:
  description: says hello
  tasks:
    - id: step1
      taskRef: http-call
      dependsOn: []
"#;

    #[test]
    fn parses_valid_workflow() {
        let workflow = parse_workflow(VALID).unwrap();
        assert_eq!(workflow.name(), "greet");
        assert_eq!(workflow.namespace(), "demo");
        assert_eq!(workflow.spec.tasks.len(), 1);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(parse_workflow(""), Err(YamlParseException::Empty)));
        assert!(matches!(
            parse_workflow("   \n  "),
            Err(YamlParseException::Empty)
        ));
    }

    #[test]
    fn rejects_invalid_syntax() {
        let result = parse_workflow("metadata: [this is not");
        assert!(matches!(result, Err(YamlParseException::InvalidSyntax { .. })));
    }

    #[test]
    fn rejects_missing_name() {
        let text = "metadata:\n  namespace: demo\nspec: {}\n";
        assert!(matches!(parse_workflow(text), Err(YamlParseException::MissingName)));
    }

    #[test]
    fn ignores_unknown_fields() {
        let text = r#"
metadata:
  name: w1
  somethingUnknown: true
spec:
  unknownTopLevelField: 42
  tasks: []
"#;
        let workflow = parse_workflow(text).unwrap();
        assert_eq!(workflow.name(), "w1");
    }

    #[test]
    fn parses_valid_task() {
        let text = "metadata:\n  name: http-call\n  namespace: demo\nspec:\n  type: http\n";
        let task = parse_task(text).unwrap();
        assert_eq!(task.name(), "http-call");
    }
}
