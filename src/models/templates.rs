//! # Templates
//!
//! Immutable, serializable descriptions of work. A [`TaskTemplate`] names the
//! worker it needs and the ordered steps to run on it. Templates are the request
//! payloads of the bus protocol and the input file format of the `master` command.
//!
//! ```json
//! {
//!   "id": "8f8f5b6e-3a55-4a8e-9b0b-0c5e3c1f2a10",
//!   "worker": { "backend": "local" },
//!   "steps": [
//!     { "sequence_order": 1, "kind": "process", "process": { "command": "make build" } },
//!     { "sequence_order": 2, "kind": "nested_task", "task": { "worker": { "backend": "docker", "image": "alpine" }, "steps": [] } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{OrchestratorError, OrchestratorResult};

fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Describes the execution environment a task needs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerTemplate {
    #[serde(default = "new_id")]
    pub id: Uuid,
    /// Registered backend name, e.g. `local` or `docker`
    pub backend: String,
    /// Container image for image-based backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Backend-specific parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl WorkerTemplate {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            backend: backend.into(),
            image: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A shell command to run on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTemplate {
    #[serde(default = "new_id")]
    pub id: Uuid,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl ProcessTemplate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            command: command.into(),
            working_directory: None,
            stdin: None,
        }
    }

    pub fn in_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// What a step runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Process,
    NestedTask,
    /// Any kind this node does not understand
    #[serde(other)]
    Unsupported,
}

/// One unit of work within a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    #[serde(default = "new_id")]
    pub id: Uuid,
    /// Execution order within the task. Ties keep declaration order.
    #[serde(default)]
    pub sequence_order: i64,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Box<TaskTemplate>>,
}

/// Borrowed view of a step's payload after validation
#[derive(Debug, Clone, Copy)]
pub enum StepPayload<'a> {
    Process(&'a ProcessTemplate),
    NestedTask(&'a TaskTemplate),
}

impl StepTemplate {
    pub fn process(sequence_order: i64, process: ProcessTemplate) -> Self {
        Self {
            id: new_id(),
            sequence_order,
            kind: StepKind::Process,
            process: Some(process),
            task: None,
        }
    }

    pub fn nested(sequence_order: i64, task: TaskTemplate) -> Self {
        Self {
            id: new_id(),
            sequence_order,
            kind: StepKind::NestedTask,
            process: None,
            task: Some(Box::new(task)),
        }
    }

    /// Resolve the payload matching `kind`
    ///
    /// Exactly one payload must be present and it must agree with the kind.
    pub fn payload(&self) -> OrchestratorResult<StepPayload<'_>> {
        match (self.kind, &self.process, &self.task) {
            (StepKind::Process, Some(process), None) => Ok(StepPayload::Process(process)),
            (StepKind::NestedTask, None, Some(task)) => Ok(StepPayload::NestedTask(task)),
            (StepKind::Unsupported, _, _) => Err(OrchestratorError::unsupported_step(
                self.id,
                "unsupported step kind",
            )),
            (kind, process, task) => Err(OrchestratorError::unsupported_step(
                self.id,
                format!(
                    "{kind:?} step has process payload: {}, task payload: {}",
                    process.is_some(),
                    task.is_some()
                ),
            )),
        }
    }
}

/// An immutable description of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    #[serde(default = "new_id")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Reserved; steps always run sequentially
    #[serde(default)]
    pub is_atomic: bool,
    /// Reserved; steps always run sequentially
    #[serde(default)]
    pub is_concurrent: bool,
    pub worker: WorkerTemplate,
    #[serde(default)]
    pub steps: Vec<StepTemplate>,
}

impl TaskTemplate {
    pub fn new(worker: WorkerTemplate) -> Self {
        Self {
            id: new_id(),
            name: None,
            is_atomic: false,
            is_concurrent: false,
            worker,
            steps: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Shorthand for appending a process step after the current last one
    pub fn with_command(self, command: impl Into<String>) -> Self {
        let order = self.steps.len() as i64 + 1;
        self.with_step(StepTemplate::process(order, ProcessTemplate::new(command)))
    }

    /// Steps in execution order
    pub fn ordered_steps(&self) -> Vec<&StepTemplate> {
        let mut steps: Vec<&StepTemplate> = self.steps.iter().collect();
        // sort_by_key is stable
        steps.sort_by_key(|step| step.sequence_order);
        steps
    }

    /// Walk the template tree and report the first structural problem
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.worker.backend.trim().is_empty() {
            return Err(OrchestratorError::invalid_template(
                self.id,
                "worker backend must not be empty",
            ));
        }
        for step in &self.steps {
            match step.payload()? {
                StepPayload::Process(process) if process.command.trim().is_empty() => {
                    return Err(OrchestratorError::invalid_template(
                        process.id,
                        "process command must not be empty",
                    ));
                }
                StepPayload::Process(_) => {}
                StepPayload::NestedTask(task) => task.validate()?,
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_ordered_steps_is_stable() {
        let mut template = TaskTemplate::new(WorkerTemplate::new("local"));
        template.steps = vec![
            StepTemplate::process(2, ProcessTemplate::new("c")),
            StepTemplate::process(1, ProcessTemplate::new("a")),
            StepTemplate::process(2, ProcessTemplate::new("d")),
            StepTemplate::process(1, ProcessTemplate::new("b")),
        ];

        let commands: Vec<&str> = template
            .ordered_steps()
            .iter()
            .map(|step| step.process.as_ref().unwrap().command.as_str())
            .collect();
        assert_eq!(commands, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_payload_requires_matching_kind() {
        let mut step = StepTemplate::process(1, ProcessTemplate::new("true"));
        assert!(matches!(step.payload(), Ok(StepPayload::Process(_))));

        step.kind = StepKind::NestedTask;
        let err = step.payload().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        step.kind = StepKind::Unsupported;
        assert!(step.payload().is_err());
    }

    #[test]
    fn test_unknown_kind_deserializes_as_unsupported() {
        let json = r#"{"sequence_order": 1, "kind": "lambda"}"#;
        let step: StepTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(step.kind, StepKind::Unsupported);
        assert!(step.payload().is_err());
    }

    #[test]
    fn test_minimal_json_gets_ids() {
        let json = r#"{"worker": {"backend": "local"}, "steps": [
            {"sequence_order": 1, "kind": "process", "process": {"command": "echo hi"}}
        ]}"#;
        let template: TaskTemplate = serde_json::from_str(json).unwrap();
        assert!(!template.id.is_nil());
        assert!(!template.worker.id.is_nil());
        assert_eq!(template.steps.len(), 1);
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_validate_recurses_into_nested_tasks() {
        let inner = TaskTemplate::new(WorkerTemplate::new("")).with_command("true");
        let outer = TaskTemplate::new(WorkerTemplate::new("local")).with_step(StepTemplate::nested(1, inner));
        let err = outer.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTemplate { .. }));
    }
}
