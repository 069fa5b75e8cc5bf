//! Variables: named slots shared across a model's lifetime
//!
//! Variables resolve lazily. A declaration says how the value is
//! obtained (a constant, an argument of the root, or the output of a
//! prior step); the engine resolves it on first read in an activation.

use crate::{EventName, TaskRef, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// How a variable obtains its value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "from", rename_all = "snake_case")]
pub enum Resolution {
    /// A fixed value
    Constant(Value),
    /// Forwarded from a named argument of the coordinated root
    Argument(String),
    /// The payload recorded when the step with this label exited
    StepOutput(String),
    /// No value until explicitly assigned
    Assigned,
}

/// Declaration of a variable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    /// Optional declared type, checked on resolution and assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    pub resolution: Resolution,
}

impl VariableDecl {
    pub fn new(name: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            name: name.into(),
            kind: None,
            resolution,
        }
    }

    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, Resolution::Constant(value.into()))
    }

    pub fn argument(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::new(name, Resolution::Argument(argument.into()))
    }

    pub fn step_output(name: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(name, Resolution::StepOutput(step.into()))
    }

    pub fn assigned(name: impl Into<String>) -> Self {
        Self::new(name, Resolution::Assigned)
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Where an assigned value comes from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignSource {
    Constant(Value),
    /// Payload of an observed event; `Null` when the event carried none
    Payload { task: TaskRef, event: EventName },
    /// The handle of the task being retired
    CurrentTask,
    /// Copy of another variable
    Variable(String),
}

/// A variable update applied at a step boundary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub variable: String,
    pub source: AssignSource,
}

impl Assignment {
    pub fn new(variable: impl Into<String>, source: AssignSource) -> Self {
        Self {
            variable: variable.into(),
            source,
        }
    }

    pub fn constant(variable: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(variable, AssignSource::Constant(value.into()))
    }

    /// Capture the payload of `event` emitted by the current task
    pub fn capture(variable: impl Into<String>, event: impl Into<EventName>) -> Self {
        Self::new(
            variable,
            AssignSource::Payload {
                task: TaskRef::Current,
                event: event.into(),
            },
        )
    }

    pub fn current_task(variable: impl Into<String>) -> Self {
        Self::new(variable, AssignSource::CurrentTask)
    }
}
