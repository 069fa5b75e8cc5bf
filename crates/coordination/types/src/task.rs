//! Task handles: opaque references to externally managed tasks

use crate::{Arguments, TaskId, Value};
use serde::{Deserialize, Serialize};

/// Opaque reference to a task owned by the external plan.
///
/// The coordination model never manages the task's lifecycle itself;
/// it only decides when, within its own control flow, the task is
/// started and stopped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Plan-wide task identifier
    pub id: TaskId,
    /// Name of the task model this task was instantiated from
    pub model: String,
}

impl TaskHandle {
    pub fn new(id: TaskId, model: impl Into<String>) -> Self {
        Self {
            id,
            model: model.into(),
        }
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<{}>", self.model, self.id.short())
    }
}

/// Lifecycle state of a task as reported by the plan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Started,
    Running,
    Success,
    Failed,
    Finalized,
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Finalized)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Started => "started",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Finalized => "finalized",
        };
        write!(f, "{}", name)
    }
}

/// Description of a task to instantiate: a task model plus arguments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Task model name understood by the plan
    pub model: String,
    /// Bound arguments
    #[serde(default)]
    pub arguments: Arguments,
}

impl TaskDescription {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            arguments: Arguments::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_classification() {
        assert!(TaskState::Pending.is_pending());
        assert!(TaskState::Running.is_running());
        assert!(TaskState::Started.is_running());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_description_builder() {
        let desc = TaskDescription::new("MoveTo")
            .with_argument("x", 10i64)
            .with_argument("frame", "map");
        assert_eq!(desc.arguments.len(), 2);
        assert_eq!(desc.arguments["x"], Value::Int(10));
    }

    #[test]
    fn test_handle_display() {
        let handle = TaskHandle::new(TaskId::new("abcdef123456"), "Dock");
        assert_eq!(handle.to_string(), "Dock<abcdef12>");
    }
}
