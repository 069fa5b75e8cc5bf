//! Observed events and the subscriptions that select them
//!
//! Every delivered event gets a sequence number. Engines remember the
//! sequence number at which a step was entered, so a guard only sees
//! events from its own activation window.

use coordination_types::{EventName, TaskEvent, TaskId, Value};
use std::collections::{BTreeSet, HashMap};

/// One event as the context saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedEvent {
    pub seq: u64,
    pub name: EventName,
    pub payload: Option<Value>,
}

/// Per-task history of delivered events
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    next_seq: u64,
    by_task: HashMap<TaskId, Vec<ObservedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its sequence number
    pub fn record(&mut self, event: &TaskEvent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_task
            .entry(event.task.clone())
            .or_default()
            .push(ObservedEvent {
                seq,
                name: event.name.clone(),
                payload: event.payload.clone(),
            });
        seq
    }

    /// Sequence number the next recorded event will get
    pub fn cursor(&self) -> u64 {
        self.next_seq
    }

    fn window<'a>(&'a self, task: &TaskId, since: u64) -> impl Iterator<Item = &'a ObservedEvent> {
        self.by_task
            .get(task)
            .into_iter()
            .flat_map(|events| events.iter())
            .filter(move |e| e.seq >= since)
    }

    /// Whether `task` emitted `name`, or an event implying it, since `since`
    pub fn occurred(&self, task: &TaskId, name: &EventName, since: u64) -> bool {
        self.window(task, since).any(|e| e.name.implies(name))
    }

    /// Payload of the latest `name` event of `task` since `since`
    pub fn payload(&self, task: &TaskId, name: &EventName, since: u64) -> Option<&Value> {
        self.window(task, since)
            .filter(|e| &e.name == name)
            .last()
            .and_then(|e| e.payload.as_ref())
    }

    /// Whether `task` reached a terminal event since `since`
    pub fn finished(&self, task: &TaskId, since: u64) -> bool {
        self.window(task, since).any(|e| e.name.is_terminal())
    }

    /// Whether `task` failed since `since`
    pub fn failed(&self, task: &TaskId, since: u64) -> bool {
        self.window(task, since).any(|e| e.name.is_failure())
    }

    pub fn events_for(&self, task: &TaskId) -> &[ObservedEvent] {
        self.by_task.get(task).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.next_seq as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }
}

/// Which engine a subscription or a child belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    /// The normal coordination model
    Model,
    /// The active fault handler
    Handler,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Model => write!(f, "model"),
            Lane::Handler => write!(f, "handler"),
        }
    }
}

/// A change to forward to the event source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionChange {
    Subscribe(TaskId, EventName),
    Unsubscribe(TaskId, EventName),
}

/// The (task, event) pairs each lane is waiting on
#[derive(Clone, Debug, Default)]
pub struct Subscriptions {
    lanes: HashMap<Lane, BTreeSet<(TaskId, EventName)>>,
    changes: Vec<SubscriptionChange>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a lane's interest set, recording the difference
    pub fn replace(&mut self, lane: Lane, wanted: BTreeSet<(TaskId, EventName)>) {
        let before = self.lanes.remove(&lane).unwrap_or_default();
        let union_before = self.union();

        for (task, event) in before.difference(&wanted) {
            if !union_before.contains(&(task.clone(), event.clone())) {
                self.changes
                    .push(SubscriptionChange::Unsubscribe(task.clone(), event.clone()));
            }
        }
        for (task, event) in wanted.difference(&before) {
            if !union_before.contains(&(task.clone(), event.clone())) {
                self.changes
                    .push(SubscriptionChange::Subscribe(task.clone(), event.clone()));
            }
        }

        if !wanted.is_empty() {
            self.lanes.insert(lane, wanted);
        }
    }

    pub fn clear(&mut self, lane: Lane) {
        self.replace(lane, BTreeSet::new());
    }

    pub fn clear_all(&mut self) {
        self.clear(Lane::Handler);
        self.clear(Lane::Model);
    }

    fn union(&self) -> BTreeSet<(TaskId, EventName)> {
        self.lanes.values().flatten().cloned().collect()
    }

    /// Whether any lane waits on `name` from `task`
    pub fn wants(&self, task: &TaskId, name: &EventName) -> bool {
        self.lanes.values().flatten().any(|(t, e)| t == task && name.implies(e))
    }

    pub fn lane(&self, lane: Lane) -> Option<&BTreeSet<(TaskId, EventName)>> {
        self.lanes.get(&lane)
    }

    pub fn len(&self) -> usize {
        self.lanes.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the changes recorded since the last call
    pub fn take_changes(&mut self) -> Vec<SubscriptionChange> {
        std::mem::take(&mut self.changes)
    }
}
