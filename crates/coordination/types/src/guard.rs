//! Event guards: the conditions that let a step advance
//!
//! A guard is an immutable boolean expression over observed events.
//! Evaluation is three-valued: a guard may be [`Truth::Pending`] when it
//! is not yet decidable. This lets engines tell "not satisfied yet" from
//! "never satisfiable".

use crate::{EventName, Value};
use serde::{Deserialize, Serialize};

/// Which task a guard leaf refers to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "ref", content = "name", rename_all = "snake_case")]
pub enum TaskRef {
    /// The task of the active step (or the last retired step task when
    /// the active step carries none)
    Current,
    /// The coordinated root task
    Root,
    /// The task held by a variable
    Variable(String),
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::Current => write!(f, "current"),
            TaskRef::Root => write!(f, "root"),
            TaskRef::Variable(name) => write!(f, "${}", name),
        }
    }
}

/// A guard leaf. Leaves are the unit of memoization and subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "leaf", rename_all = "snake_case")]
pub enum GuardLeaf {
    /// `task` has emitted `event`
    Emitted { task: TaskRef, event: EventName },
    /// A variable currently holds `value`
    VariableEquals { name: String, value: Value },
}

impl std::fmt::Display for GuardLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardLeaf::Emitted { task, event } => write!(f, "{}.{}", task, event),
            GuardLeaf::VariableEquals { name, value } => write!(f, "${} == {}", name, value),
        }
    }
}

/// A boolean expression tree over guard leaves
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventGuard {
    /// Always satisfied
    Always,
    Leaf(GuardLeaf),
    All(Vec<EventGuard>),
    Any(Vec<EventGuard>),
    Not(Box<EventGuard>),
}

impl EventGuard {
    /// `task` emitted `event`
    pub fn emitted(task: TaskRef, event: impl Into<EventName>) -> Self {
        Self::Leaf(GuardLeaf::Emitted {
            task,
            event: event.into(),
        })
    }

    /// The current step's task emitted `event`
    pub fn on(event: impl Into<EventName>) -> Self {
        Self::emitted(TaskRef::Current, event)
    }

    /// The current step's task succeeded
    pub fn on_success() -> Self {
        Self::on(EventName::SUCCESS)
    }

    /// The current step's task failed
    pub fn on_failure() -> Self {
        Self::on(EventName::FAILED)
    }

    /// An event observed on the coordinated root
    pub fn forwarded(event: impl Into<EventName>) -> Self {
        Self::emitted(TaskRef::Root, event)
    }

    pub fn variable_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Leaf(GuardLeaf::VariableEquals {
            name: name.into(),
            value: value.into(),
        })
    }

    pub fn all(guards: Vec<EventGuard>) -> Self {
        Self::All(guards)
    }

    pub fn any(guards: Vec<EventGuard>) -> Self {
        Self::Any(guards)
    }

    pub fn negate(guard: EventGuard) -> Self {
        Self::Not(Box::new(guard))
    }

    pub fn and(self, other: EventGuard) -> Self {
        match self {
            EventGuard::All(mut guards) => {
                guards.push(other);
                EventGuard::All(guards)
            }
            guard => EventGuard::All(vec![guard, other]),
        }
    }

    pub fn or(self, other: EventGuard) -> Self {
        match self {
            EventGuard::Any(mut guards) => {
                guards.push(other);
                EventGuard::Any(guards)
            }
            guard => EventGuard::Any(vec![guard, other]),
        }
    }

    /// All leaves of the guard, in first-occurrence order, without
    /// duplicates
    pub fn leaves(&self) -> Vec<&GuardLeaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a GuardLeaf>) {
        match self {
            EventGuard::Always => {}
            EventGuard::Leaf(leaf) => {
                if !out.contains(&leaf) {
                    out.push(leaf);
                }
            }
            EventGuard::All(guards) | EventGuard::Any(guards) => {
                for guard in guards {
                    guard.collect_leaves(out);
                }
            }
            EventGuard::Not(guard) => guard.collect_leaves(out),
        }
    }
}

impl std::fmt::Display for EventGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(f: &mut std::fmt::Formatter<'_>, guards: &[EventGuard], op: &str) -> std::fmt::Result {
            write!(f, "(")?;
            for (i, guard) in guards.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", guard)?;
            }
            write!(f, ")")
        }
        match self {
            EventGuard::Always => write!(f, "always"),
            EventGuard::Leaf(leaf) => write!(f, "{}", leaf),
            EventGuard::All(guards) => join(f, guards, "&&"),
            EventGuard::Any(guards) => join(f, guards, "||"),
            EventGuard::Not(guard) => write!(f, "!{}", guard),
        }
    }
}

/// Three-valued truth (Kleene logic)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Truth {
    True,
    False,
    Pending,
}

impl Truth {
    pub fn is_true(self) -> bool {
        matches!(self, Truth::True)
    }

    pub fn is_false(self) -> bool {
        matches!(self, Truth::False)
    }

    pub fn is_decided(self) -> bool {
        !matches!(self, Truth::Pending)
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Pending,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Pending,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Pending => Truth::Pending,
        }
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaves_deduplicated() {
        let guard = EventGuard::on_success()
            .or(EventGuard::on_failure())
            .or(EventGuard::on_success().and(EventGuard::forwarded("abort")));
        let leaves = guard.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(
            leaves[0],
            &GuardLeaf::Emitted {
                task: TaskRef::Current,
                event: EventName::success()
            }
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = EventGuard::emitted(TaskRef::Variable("dock".into()), "success");
        let b = EventGuard::emitted(TaskRef::Variable("dock".into()), "success");
        assert_eq!(a, b);
        assert_ne!(a, EventGuard::on_success());
    }

    #[test]
    fn test_kleene_tables() {
        use Truth::*;
        assert_eq!(False.and(Pending), False);
        assert_eq!(True.and(Pending), Pending);
        assert_eq!(True.or(Pending), True);
        assert_eq!(False.or(Pending), Pending);
        assert_eq!(Pending.not(), Pending);
        assert_eq!(True.not(), False);
    }

    #[test]
    fn test_display() {
        let guard = EventGuard::on_success().or(EventGuard::negate(EventGuard::forwarded("halt")));
        assert_eq!(guard.to_string(), "(current.success || !root.halt)");
    }
}
