//! Fault response entries: what to run when something goes wrong
//!
//! A fault response table maps fault predicates to handler models.
//! Handlers are ordinary scripts or state machines that run in place of
//! the normal flow until they finish.

use crate::{Fault, Script, StateMachineModel, VariableDecl};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Predicate over a fault
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPredicate {
    /// Matches every fault
    Any,
    /// Matches faults of one category
    Category(String),
    /// Matches faults whose message contains the text
    MessageContains(String),
    All(Vec<FaultPredicate>),
    AnyOf(Vec<FaultPredicate>),
    Not(Box<FaultPredicate>),
}

impl FaultPredicate {
    pub fn category(name: impl Into<String>) -> Self {
        Self::Category(name.into())
    }

    pub fn message_contains(text: impl Into<String>) -> Self {
        Self::MessageContains(text.into())
    }

    pub fn negate(predicate: FaultPredicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    pub fn matches(&self, fault: &Fault) -> bool {
        match self {
            FaultPredicate::Any => true,
            FaultPredicate::Category(name) => fault.category.as_str() == name,
            FaultPredicate::MessageContains(text) => fault.message.contains(text.as_str()),
            FaultPredicate::All(predicates) => predicates.iter().all(|p| p.matches(fault)),
            FaultPredicate::AnyOf(predicates) => predicates.iter().any(|p| p.matches(fault)),
            FaultPredicate::Not(predicate) => !predicate.matches(fault),
        }
    }
}

/// Which faults an entry is allowed to see
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultScope {
    /// Faults on the root or its direct children
    Local,
    /// Faults anywhere below the root
    Propagating,
}

/// How the suspended model resumes once a handler succeeds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resumption {
    /// Start the model again from its initial step
    Restart,
    /// Continue from the step that was active when the fault hit
    Continue,
}

/// A script or a state machine: anything the engine can run
#[derive(Clone, Debug)]
pub enum CoordinationModel {
    Script(Arc<Script>),
    StateMachine(Arc<StateMachineModel>),
}

impl CoordinationModel {
    pub fn name(&self) -> &str {
        match self {
            CoordinationModel::Script(script) => &script.name,
            CoordinationModel::StateMachine(machine) => &machine.name,
        }
    }

    /// Variables declared by the model
    pub fn variables(&self) -> &[VariableDecl] {
        match self {
            CoordinationModel::Script(script) => &script.variables,
            CoordinationModel::StateMachine(machine) => &machine.variables,
        }
    }
}

impl From<Script> for CoordinationModel {
    fn from(script: Script) -> Self {
        CoordinationModel::Script(Arc::new(script))
    }
}

impl From<StateMachineModel> for CoordinationModel {
    fn from(machine: StateMachineModel) -> Self {
        CoordinationModel::StateMachine(Arc::new(machine))
    }
}

/// One entry of a fault response table
#[derive(Clone, Debug)]
pub struct FaultResponseEntry {
    pub name: String,
    pub predicate: FaultPredicate,
    pub handler: CoordinationModel,
    /// Higher wins; ties go to the earliest registration
    pub priority: i32,
    pub scope: FaultScope,
    pub resumption: Resumption,
    /// Retire the suspended model's current task when the handler starts
    pub replaces_suspended_task: bool,
}

impl FaultResponseEntry {
    pub fn new(
        name: impl Into<String>,
        predicate: FaultPredicate,
        handler: impl Into<CoordinationModel>,
        priority: i32,
    ) -> Self {
        Self {
            name: name.into(),
            predicate,
            handler: handler.into(),
            priority,
            scope: FaultScope::Local,
            resumption: Resumption::Continue,
            replaces_suspended_task: false,
        }
    }

    pub fn with_scope(mut self, scope: FaultScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_resumption(mut self, resumption: Resumption) -> Self {
        self.resumption = resumption;
        self
    }

    pub fn replacing_suspended_task(mut self) -> Self {
        self.replaces_suspended_task = true;
        self
    }
}

/// Lifecycle of a fault response entry
///
/// `Idle -> Triggered -> Handling -> {Resolved | Escalated}`, after which
/// the entry returns to `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Idle,
    Triggered,
    Handling,
    Resolved,
    Escalated,
}

impl EntryState {
    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(self, next: EntryState) -> bool {
        matches!(
            (self, next),
            (EntryState::Idle, EntryState::Triggered)
                | (EntryState::Triggered, EntryState::Handling)
                | (EntryState::Triggered, EntryState::Escalated)
                | (EntryState::Handling, EntryState::Resolved)
                | (EntryState::Handling, EntryState::Escalated)
                | (EntryState::Handling, EntryState::Idle)
                | (EntryState::Resolved, EntryState::Idle)
                | (EntryState::Escalated, EntryState::Idle)
        )
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryState::Idle => "idle",
            EntryState::Triggered => "triggered",
            EntryState::Handling => "handling",
            EntryState::Resolved => "resolved",
            EntryState::Escalated => "escalated",
        };
        write!(f, "{}", name)
    }
}
