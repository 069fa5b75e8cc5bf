//! External collaborators: the plan that owns tasks and delivers events
//!
//! The coordination core never schedules tasks itself. It talks to the
//! plan through [`TaskProvider`] and receives signals through
//! [`EventSource`].

use crate::{
    Arguments, EventName, Role, Signal, TaskDescription, TaskHandle, TaskId, TaskState, Value,
};

/// Errors reported by the task provider
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown task model: {0}")]
    UnknownModel(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Task {task} already attached under role '{role}'")]
    AlreadyAttached { task: String, role: String },

    #[error("Task {task} not attached under role '{role}'")]
    NotAttached { task: String, role: String },
}

/// The external plan manager
pub trait TaskProvider {
    /// Instantiate a task from a description
    fn instantiate(&mut self, description: &TaskDescription) -> Result<TaskHandle, ProviderError>;

    /// Request that a task starts. Starting a running task is a no-op.
    fn start(&mut self, task: &TaskHandle) -> Result<(), ProviderError>;

    /// Request that a task stops
    fn stop(&mut self, task: &TaskHandle) -> Result<(), ProviderError>;

    /// Record `child` as a child of `root` under `role`
    fn attach_child(
        &mut self,
        root: &TaskHandle,
        child: &TaskHandle,
        role: &Role,
    ) -> Result<(), ProviderError>;

    /// Undo a previous [`TaskProvider::attach_child`]
    fn detach_child(
        &mut self,
        root: &TaskHandle,
        child: &TaskHandle,
        role: &Role,
    ) -> Result<(), ProviderError>;

    /// Current lifecycle state of a task
    fn state(&self, task: &TaskHandle) -> TaskState;

    /// Read an argument of a task
    fn argument(&self, task: &TaskHandle, name: &str) -> Option<Value>;

    /// Write an argument of a task
    fn set_argument(
        &mut self,
        task: &TaskHandle,
        name: &str,
        value: Value,
    ) -> Result<(), ProviderError>;

    /// Emit an event on a task (used to forward events to the root)
    fn emit(
        &mut self,
        task: &TaskHandle,
        event: &EventName,
        payload: Option<Value>,
    ) -> Result<(), ProviderError>;
}

/// The plan's event dispatcher.
///
/// Guarantees at-most-once delivery per occurrence and FIFO order per
/// task.
pub trait EventSource {
    /// Register interest in `event` on `task`
    fn subscribe(&mut self, task: &TaskId, event: &EventName);

    /// Drop interest in `event` on `task`
    fn unsubscribe(&mut self, task: &TaskId, event: &EventName);

    /// Take the signals observed since the last poll, in order
    fn poll(&mut self) -> Vec<Signal>;
}

/// A caller-supplied task builder, registered by name
pub trait TaskBuilder {
    fn build(
        &self,
        provider: &mut dyn TaskProvider,
        arguments: &Arguments,
    ) -> Result<TaskHandle, ProviderError>;
}

/// An object that can describe the plan task it stands for
pub trait AsPlan: std::fmt::Debug {
    /// A short name used in logs and role strings
    fn name(&self) -> &str;

    /// The task description this object produces
    fn as_plan(&self) -> TaskDescription;
}

impl<F> TaskBuilder for F
where
    F: Fn(&mut dyn TaskProvider, &Arguments) -> Result<TaskHandle, ProviderError>,
{
    fn build(
        &self,
        provider: &mut dyn TaskProvider,
        arguments: &Arguments,
    ) -> Result<TaskHandle, ProviderError> {
        self(provider, arguments)
    }
}
