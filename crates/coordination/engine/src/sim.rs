//! In-memory plan for demos and tests
//!
//! `SimulatedPlan` plays both external collaborators at once: it owns
//! tasks like a plan manager would ([`TaskProvider`]) and queues the
//! signals they produce like the plan's dispatcher ([`EventSource`]).
//! Task ids are sequential (`task-1`, `task-2`, ...) so runs are
//! reproducible.
//!
//! Nothing happens on its own. A test or demo drives the tasks with
//! [`SimulatedPlan::succeed`], [`SimulatedPlan::fail`],
//! [`SimulatedPlan::emit_event`] and [`SimulatedPlan::raise`].

use coordination_types::{
    Arguments, EventName, EventSource, Fault, ProviderError, Role, Signal, TaskDescription,
    TaskEvent, TaskHandle, TaskId, TaskProvider, TaskState, Value,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Clone, Debug)]
struct SimTask {
    state: TaskState,
    arguments: Arguments,
}

/// A deterministic, in-memory plan
#[derive(Clone, Debug, Default)]
pub struct SimulatedPlan {
    next_id: u64,
    tasks: BTreeMap<TaskId, SimTask>,
    /// Parent -> attached children, in attachment order
    children: BTreeMap<TaskId, Vec<(TaskHandle, Role)>>,
    instantiated: Vec<TaskHandle>,
    stopped: BTreeSet<TaskId>,
    emitted: Vec<(TaskId, EventName)>,
    outbox: VecDeque<Signal>,
    subscriptions: BTreeSet<(TaskId, EventName)>,
    /// When set, only these task models can be instantiated
    known_models: Option<BTreeSet<String>>,
}

impl SimulatedPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject instantiation of any model not listed
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    fn allocate(&mut self, model: &str, state: TaskState, arguments: Arguments) -> TaskHandle {
        self.next_id += 1;
        let handle = TaskHandle::new(TaskId::new(format!("task-{}", self.next_id)), model);
        self.tasks.insert(
            handle.id.clone(),
            SimTask {
                state,
                arguments,
            },
        );
        handle
    }

    fn task(&self, id: &TaskId) -> Result<&SimTask, ProviderError> {
        self.tasks
            .get(id)
            .ok_or_else(|| ProviderError::UnknownTask(id.to_string()))
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut SimTask, ProviderError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| ProviderError::UnknownTask(id.to_string()))
    }

    // ── Driving tasks ────────────────────────────────────────────────

    /// Add an already running root task
    pub fn add_root(&mut self, model: &str) -> TaskHandle {
        let handle = self.allocate(model, TaskState::Running, Arguments::new());
        tracing::debug!(task = %handle, "Simulated root added");
        handle
    }

    pub fn set_root_argument(&mut self, root: &TaskHandle, name: &str, value: Value) {
        if let Some(task) = self.tasks.get_mut(&root.id) {
            task.arguments.insert(name.to_string(), value);
        }
    }

    /// Apply the lifecycle effect of an event without queueing it
    pub fn record(&mut self, event: &TaskEvent) {
        let Some(task) = self.tasks.get_mut(&event.task) else {
            return;
        };
        let next = match event.name.as_str() {
            "start" if !task.state.is_terminal() => TaskState::Running,
            "success" if !task.state.is_terminal() => TaskState::Success,
            "failed" if !task.state.is_terminal() => TaskState::Failed,
            "stop" => TaskState::Finalized,
            _ => return,
        };
        task.state = next;
    }

    /// Emit an event on a task and queue it for delivery
    pub fn emit_event(&mut self, task: &TaskHandle, name: &str) -> TaskEvent {
        self.queue(TaskEvent::new(task.id.clone(), name))
    }

    pub fn emit_payload(&mut self, task: &TaskHandle, name: &str, payload: Value) -> TaskEvent {
        self.queue(TaskEvent::new(task.id.clone(), name).with_payload(payload))
    }

    /// Finish a task successfully
    pub fn succeed(&mut self, task: &TaskHandle) -> TaskEvent {
        self.queue(TaskEvent::new(task.id.clone(), EventName::success()))
    }

    /// Finish a task with a failure
    pub fn fail(&mut self, task: &TaskHandle) -> TaskEvent {
        self.queue(TaskEvent::new(task.id.clone(), EventName::failed()))
    }

    /// Raise a fault on a task. The ancestry is filled in from the
    /// attachments the plan knows about.
    pub fn raise(&mut self, task: &TaskHandle, category: &str) -> Fault {
        let fault = Fault::new(task.id.clone(), category).with_ancestry(self.ancestry(&task.id));
        tracing::debug!(fault = %fault, "Simulated fault raised");
        self.outbox.push_back(Signal::Fault(fault.clone()));
        fault
    }

    fn queue(&mut self, event: TaskEvent) -> TaskEvent {
        self.record(&event);
        self.outbox.push_back(Signal::Event(event.clone()));
        event
    }

    fn parent_of(&self, task: &TaskId) -> Option<&TaskId> {
        self.children
            .iter()
            .find(|(_, kids)| kids.iter().any(|(child, _)| &child.id == task))
            .map(|(parent, _)| parent)
    }

    /// Ancestors of a task, nearest parent first
    pub fn ancestry(&self, task: &TaskId) -> Vec<TaskId> {
        let mut chain = Vec::new();
        let mut cursor = task;
        while let Some(parent) = self.parent_of(cursor) {
            if chain.contains(parent) {
                break;
            }
            chain.push(parent.clone());
            cursor = parent;
        }
        chain
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn state_of(&self, task: &TaskId) -> TaskState {
        self.tasks
            .get(task)
            .map(|t| t.state)
            .unwrap_or(TaskState::Finalized)
    }

    /// Whether anyone asked this task to stop
    pub fn was_stopped(&self, task: &TaskId) -> bool {
        self.stopped.contains(task)
    }

    pub fn children_of(&self, parent: &TaskHandle) -> Vec<(TaskHandle, Role)> {
        self.children.get(&parent.id).cloned().unwrap_or_default()
    }

    /// Attached children that have not reached a terminal state
    pub fn running_children(&self, parent: &TaskHandle) -> usize {
        self.children_of(parent)
            .iter()
            .filter(|(child, _)| !self.state_of(&child.id).is_terminal())
            .count()
    }

    /// Every task instantiated through the provider, in order
    pub fn instantiations(&self) -> &[TaskHandle] {
        &self.instantiated
    }

    /// Names of the events emitted on a task through the provider
    pub fn emitted_on(&self, task: &TaskId) -> Vec<String> {
        self.emitted
            .iter()
            .filter(|(on, _)| on == task)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn is_subscribed(&self, task: &TaskId, event: &EventName) -> bool {
        self.subscriptions.contains(&(task.clone(), event.clone()))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Signals queued and not yet polled
    pub fn pending_signals(&self) -> usize {
        self.outbox.len()
    }
}

impl TaskProvider for SimulatedPlan {
    fn instantiate(&mut self, description: &TaskDescription) -> Result<TaskHandle, ProviderError> {
        if let Some(known) = &self.known_models {
            if !known.contains(&description.model) {
                return Err(ProviderError::UnknownModel(description.model.clone()));
            }
        }
        let handle = self.allocate(
            &description.model,
            TaskState::Pending,
            description.arguments.clone(),
        );
        self.instantiated.push(handle.clone());
        tracing::trace!(task = %handle, "Simulated task instantiated");
        Ok(handle)
    }

    fn start(&mut self, task: &TaskHandle) -> Result<(), ProviderError> {
        let state = self.task(&task.id)?.state;
        match state {
            TaskState::Pending => {
                self.task_mut(&task.id)?.state = TaskState::Started;
                self.queue(TaskEvent::new(task.id.clone(), EventName::start()));
                Ok(())
            }
            TaskState::Started | TaskState::Running => Ok(()),
            _ => Err(ProviderError::Rejected(format!(
                "cannot start {} in state {}",
                task, state
            ))),
        }
    }

    fn stop(&mut self, task: &TaskHandle) -> Result<(), ProviderError> {
        let sim = self.task_mut(&task.id)?;
        if !sim.state.is_terminal() {
            sim.state = TaskState::Finalized;
        }
        self.stopped.insert(task.id.clone());
        Ok(())
    }

    fn attach_child(
        &mut self,
        root: &TaskHandle,
        child: &TaskHandle,
        role: &Role,
    ) -> Result<(), ProviderError> {
        self.task(&root.id)?;
        self.task(&child.id)?;
        let kids = self.children.entry(root.id.clone()).or_default();
        if kids.iter().any(|(c, r)| c.id == child.id && r == role) {
            return Err(ProviderError::AlreadyAttached {
                task: child.to_string(),
                role: role.to_string(),
            });
        }
        kids.push((child.clone(), role.clone()));
        Ok(())
    }

    fn detach_child(
        &mut self,
        root: &TaskHandle,
        child: &TaskHandle,
        role: &Role,
    ) -> Result<(), ProviderError> {
        let not_attached = || ProviderError::NotAttached {
            task: child.to_string(),
            role: role.to_string(),
        };
        let kids = self.children.get_mut(&root.id).ok_or_else(not_attached)?;
        let position = kids
            .iter()
            .position(|(c, r)| c.id == child.id && r == role)
            .ok_or_else(not_attached)?;
        kids.remove(position);
        if kids.is_empty() {
            self.children.remove(&root.id);
        }
        Ok(())
    }

    fn state(&self, task: &TaskHandle) -> TaskState {
        self.state_of(&task.id)
    }

    fn argument(&self, task: &TaskHandle, name: &str) -> Option<Value> {
        self.tasks
            .get(&task.id)
            .and_then(|t| t.arguments.get(name).cloned())
    }

    fn set_argument(
        &mut self,
        task: &TaskHandle,
        name: &str,
        value: Value,
    ) -> Result<(), ProviderError> {
        self.task_mut(&task.id)?
            .arguments
            .insert(name.to_string(), value);
        Ok(())
    }

    fn emit(
        &mut self,
        task: &TaskHandle,
        event: &EventName,
        payload: Option<Value>,
    ) -> Result<(), ProviderError> {
        self.task(&task.id)?;
        self.emitted.push((task.id.clone(), event.clone()));
        let mut observed = TaskEvent::new(task.id.clone(), event.clone());
        observed.payload = payload;
        self.queue(observed);
        Ok(())
    }
}

impl EventSource for SimulatedPlan {
    fn subscribe(&mut self, task: &TaskId, event: &EventName) {
        self.subscriptions.insert((task.clone(), event.clone()));
    }

    fn unsubscribe(&mut self, task: &TaskId, event: &EventName) {
        self.subscriptions.remove(&(task.clone(), event.clone()));
    }

    fn poll(&mut self) -> Vec<Signal> {
        self.outbox.drain(..).collect()
    }
}
