//! Completions: the terminal record of a coordination model
//!
//! A completion names where the model ended and the path it took to
//! get there, so that the owning task can decide for itself whether a
//! terminal state reached through a failure path counts as success.

use crate::{StateId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a model reached its end
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Every step on the path ended without a sub-task failure
    Nominal,
    /// The path to the end went through a failed sub-task
    FailureRecovered,
}

/// Where the model ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// A script ran past its last instruction
    ScriptEnd { instructions: usize },
    /// A state machine reached a terminal state
    State(StateId),
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminal::ScriptEnd { instructions } => {
                write!(f, "end of script ({} instructions)", instructions)
            }
            Terminal::State(state) => write!(f, "state '{}'", state),
        }
    }
}

/// One step along the path of a model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRecord {
    /// A script instruction exited
    Advanced {
        pc: usize,
        label: String,
        task: Option<TaskId>,
        via_failure: bool,
    },
    /// A script instruction was skipped by its entry guard
    Skipped { pc: usize, label: String },
    /// A state machine transition fired
    Transition {
        from: StateId,
        to: StateId,
        /// Index of the transition within the source state
        index: usize,
        via_failure: bool,
    },
}

impl StepRecord {
    pub fn via_failure(&self) -> bool {
        match self {
            StepRecord::Advanced { via_failure, .. } | StepRecord::Transition { via_failure, .. } => {
                *via_failure
            }
            StepRecord::Skipped { .. } => false,
        }
    }
}

/// The terminal record of a finished model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Name of the model that finished
    pub model: String,
    pub terminal: Terminal,
    pub kind: CompletionKind,
    /// Every advance, skip and transition, in order
    pub path: Vec<StepRecord>,
    pub finished_at: DateTime<Utc>,
}

impl Completion {
    pub fn new(model: impl Into<String>, terminal: Terminal, kind: CompletionKind, path: Vec<StepRecord>) -> Self {
        Self {
            model: model.into(),
            terminal,
            kind,
            path,
            finished_at: Utc::now(),
        }
    }

    pub fn is_nominal(&self) -> bool {
        self.kind == CompletionKind::Nominal
    }

    /// The transition that led into the terminal state, if any
    pub fn last_transition(&self) -> Option<&StepRecord> {
        self.path
            .iter()
            .rev()
            .find(|step| matches!(step, StepRecord::Transition { .. }))
    }

    /// Number of state transitions or instruction advances on the path
    pub fn steps_taken(&self) -> usize {
        self.path
            .iter()
            .filter(|step| !matches!(step, StepRecord::Skipped { .. }))
            .count()
    }
}
