//! Events and faults: what tasks emit over their lifetime
//!
//! An event is a named occurrence on a task. Once observed it cannot
//! un-occur. A fault is an abnormal condition reported by the plan
//! for some task; faults are what fault response tables react to.

use crate::{TaskId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of an event emitted by a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventName(pub String);

impl EventName {
    pub const START: &'static str = "start";
    pub const SUCCESS: &'static str = "success";
    pub const FAILED: &'static str = "failed";
    pub const STOP: &'static str = "stop";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn start() -> Self {
        Self::new(Self::START)
    }

    pub fn success() -> Self {
        Self::new(Self::SUCCESS)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stop() -> Self {
        Self::new(Self::STOP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Terminal events end the task: `success`, `failed` and `stop`
    pub fn is_terminal(&self) -> bool {
        matches!(self.0.as_str(), Self::SUCCESS | Self::FAILED | Self::STOP)
    }

    pub fn is_failure(&self) -> bool {
        self.0 == Self::FAILED
    }

    /// Whether observing `self` also counts as observing `other`.
    ///
    /// Every terminal event implies `stop`.
    pub fn implies(&self, other: &EventName) -> bool {
        self == other || (other.0 == Self::STOP && self.is_terminal())
    }

    /// The terminal events every step subscribes to on its own task
    pub fn terminal_events() -> [EventName; 3] {
        [Self::success(), Self::failed(), Self::stop()]
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An event emitted by a task, as delivered by the plan's dispatcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// The emitting task
    pub task: TaskId,
    /// Event name
    pub name: EventName,
    /// Optional payload carried by the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// When the plan observed the event
    pub emitted_at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task: TaskId, name: impl Into<EventName>) -> Self {
        Self {
            task,
            name: name.into(),
            payload: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Category of a fault, matched by fault predicates
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultCategory(pub String);

impl FaultCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A runtime fault reported for a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Task on which the fault originated
    pub origin: TaskId,
    /// Fault category
    pub category: FaultCategory,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Ancestors of the origin task, nearest parent first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestry: Vec<TaskId>,
    /// When the fault was raised
    pub raised_at: DateTime<Utc>,
}

impl Fault {
    pub fn new(origin: TaskId, category: impl Into<String>) -> Self {
        Self {
            origin,
            category: FaultCategory::new(category),
            message: String::new(),
            ancestry: Vec::new(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_ancestry(mut self, ancestry: Vec<TaskId>) -> Self {
        self.ancestry = ancestry;
        self
    }

    /// Whether `task` is the origin or one of its ancestors
    pub fn involves(&self, task: &TaskId) -> bool {
        &self.origin == task || self.ancestry.contains(task)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.category, self.origin)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// A unit of work on the serialized delivery queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Event(TaskEvent),
    Fault(Fault),
}

impl Signal {
    /// The task the signal concerns
    pub fn task(&self) -> &TaskId {
        match self {
            Signal::Event(event) => &event.task,
            Signal::Fault(fault) => &fault.origin,
        }
    }
}

impl From<TaskEvent> for Signal {
    fn from(event: TaskEvent) -> Self {
        Signal::Event(event)
    }
}

impl From<Fault> for Signal {
    fn from(fault: Fault) -> Self {
        Signal::Fault(fault)
    }
}
