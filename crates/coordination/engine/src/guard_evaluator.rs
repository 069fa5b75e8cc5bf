//! Guard evaluator: decides event guards against the event log
//!
//! Evaluation is pure. It reads the log and a snapshot of the variables
//! the guard mentions, and never starts, stops, or resolves anything.
//! Leaves are three-valued: an event that has been seen is `True`, an
//! event that can no longer happen because its task already ended is
//! `False`, and everything else is `Pending`.

use crate::EventLog;
use coordination_types::{EventGuard, EventName, GuardLeaf, TaskId, TaskRef, Truth, Value};
use std::collections::{BTreeSet, HashMap};

/// What a guard is evaluated against
#[derive(Clone, Copy)]
pub struct GuardScope<'a> {
    pub log: &'a EventLog,
    pub root: &'a TaskId,
    /// Task the `current` reference points at
    pub current: Option<&'a TaskId>,
    /// Sequence number the activation window opens at
    pub since: u64,
    /// Values of the variables the guard mentions; absent means unbound
    pub variables: &'a HashMap<String, Value>,
}

impl<'a> GuardScope<'a> {
    fn task(&self, task: &TaskRef) -> Option<TaskId> {
        match task {
            TaskRef::Current => self.current.cloned(),
            TaskRef::Root => Some(self.root.clone()),
            TaskRef::Variable(name) => self
                .variables
                .get(name)
                .and_then(|value| value.as_task())
                .map(|handle| handle.id.clone()),
        }
    }
}

/// Decided leaves of one activation. An event leaf on a fixed task never
/// changes once decided, so it is looked up instead of recomputed. Leaves
/// that read a variable are never kept: a fault handler may rebind the
/// variable while the activation is suspended.
#[derive(Clone, Debug, Default)]
pub struct GuardMemo {
    decided: HashMap<GuardLeaf, bool>,
}

impl GuardMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.decided.clear();
    }

    pub fn len(&self) -> usize {
        self.decided.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decided.is_empty()
    }
}

/// Evaluates event guards
#[derive(Clone, Debug)]
pub struct GuardEvaluator;

impl GuardEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a guard with Kleene semantics
    pub fn evaluate(&self, guard: &EventGuard, scope: &GuardScope<'_>, memo: &mut GuardMemo) -> Truth {
        match guard {
            EventGuard::Always => Truth::True,
            EventGuard::Leaf(leaf) => self.evaluate_leaf(leaf, scope, memo),
            EventGuard::All(guards) => guards.iter().fold(Truth::True, |acc, g| {
                if acc.is_false() {
                    acc
                } else {
                    acc.and(self.evaluate(g, scope, memo))
                }
            }),
            EventGuard::Any(guards) => guards.iter().fold(Truth::False, |acc, g| {
                if acc.is_true() {
                    acc
                } else {
                    acc.or(self.evaluate(g, scope, memo))
                }
            }),
            EventGuard::Not(inner) => self.evaluate(inner, scope, memo).not(),
        }
    }

    fn evaluate_leaf(&self, leaf: &GuardLeaf, scope: &GuardScope<'_>, memo: &mut GuardMemo) -> Truth {
        if let Some(decided) = memo.decided.get(leaf) {
            return Truth::from(*decided);
        }

        let truth = match leaf {
            GuardLeaf::Emitted { task, event } => match scope.task(task) {
                Some(id) => {
                    if scope.log.occurred(&id, event, scope.since) {
                        Truth::True
                    } else if scope.log.finished(&id, scope.since) {
                        Truth::False
                    } else {
                        Truth::Pending
                    }
                }
                None => Truth::Pending,
            },
            GuardLeaf::VariableEquals { name, value } => match scope.variables.get(name) {
                Some(held) => Truth::from(held == value),
                None => Truth::Pending,
            },
        };

        if truth.is_decided() && !reads_variable(leaf) {
            memo.decided.insert(leaf.clone(), truth.is_true());
        }
        truth
    }

    /// Names of the variables a guard reads
    pub fn variables_of<'g>(&self, guard: &'g EventGuard) -> Vec<&'g str> {
        let mut names = Vec::new();
        for leaf in guard.leaves() {
            let name = match leaf {
                GuardLeaf::Emitted {
                    task: TaskRef::Variable(name),
                    ..
                } => name.as_str(),
                GuardLeaf::VariableEquals { name, .. } => name.as_str(),
                _ => continue,
            };
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// The (task, event) pairs a guard depends on, for subscription
    pub fn interest(&self, guard: &EventGuard, scope: &GuardScope<'_>) -> BTreeSet<(TaskId, EventName)> {
        guard
            .leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                GuardLeaf::Emitted { task, event } => {
                    scope.task(task).map(|id| (id, event.clone()))
                }
                GuardLeaf::VariableEquals { .. } => None,
            })
            .collect()
    }
}

fn reads_variable(leaf: &GuardLeaf) -> bool {
    matches!(
        leaf,
        GuardLeaf::VariableEquals { .. }
            | GuardLeaf::Emitted {
                task: TaskRef::Variable(_),
                ..
            }
    )
}

impl Default for GuardEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
