//! State machine models: guarded graphs of task-bearing states
//!
//! Each state is realized by a sub-task. Transitions are evaluated in
//! declaration order and the first satisfied one is taken, so a later
//! declaration can never shadow an earlier one.

use crate::{
    Assignment, CoordinationError, CoordinationResult, EventGuard, EventName, StateId, TaskSource,
    VariableDecl,
};
use std::collections::HashSet;

/// A guarded transition to another state
#[derive(Clone, Debug)]
pub struct Transition {
    pub guard: EventGuard,
    pub target: StateId,
    /// Variable updates applied when the transition is taken
    pub updates: Vec<Assignment>,
}

impl Transition {
    pub fn new(guard: EventGuard, target: impl Into<String>) -> Self {
        Self {
            guard,
            target: StateId::new(target),
            updates: Vec::new(),
        }
    }

    pub fn with_update(mut self, update: Assignment) -> Self {
        self.updates.push(update);
        self
    }
}

/// Forward an event of the state's task to the coordinated root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forward {
    pub from: EventName,
    pub to: EventName,
}

/// A state of the machine
#[derive(Clone, Debug)]
pub struct State {
    pub id: StateId,
    /// The sub-task realizing this state; `None` for marker states
    pub source: Option<TaskSource>,
    pub transitions: Vec<Transition>,
    pub forwards: Vec<Forward>,
    /// Reaching a terminal state ends the model
    pub terminal: bool,
}

impl State {
    pub fn new(id: impl Into<String>, source: TaskSource) -> Self {
        Self {
            id: StateId::new(id),
            source: Some(source),
            transitions: Vec::new(),
            forwards: Vec::new(),
            terminal: false,
        }
    }

    /// A state that starts no task and only waits on its transitions
    pub fn waiting(id: impl Into<String>) -> Self {
        Self {
            id: StateId::new(id),
            source: None,
            transitions: Vec::new(),
            forwards: Vec::new(),
            terminal: false,
        }
    }

    /// A terminal marker: the model finishes as soon as it is reached
    pub fn final_marker(id: impl Into<String>) -> Self {
        Self {
            id: StateId::new(id),
            source: None,
            transitions: Vec::new(),
            forwards: Vec::new(),
            terminal: true,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn transition(mut self, guard: EventGuard, target: impl Into<String>) -> Self {
        self.transitions.push(Transition::new(guard, target));
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn forward(mut self, from: impl Into<EventName>, to: impl Into<EventName>) -> Self {
        self.forwards.push(Forward {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn is_final_marker(&self) -> bool {
        self.terminal && self.source.is_none()
    }
}

/// An immutable, validated state machine
#[derive(Clone, Debug)]
pub struct StateMachineModel {
    pub name: String,
    pub variables: Vec<VariableDecl>,
    pub states: Vec<State>,
    pub initial: StateId,
}

impl StateMachineModel {
    pub fn builder(name: impl Into<String>) -> StateMachineBuilder {
        StateMachineBuilder::new(name)
    }

    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn initial_state(&self) -> Option<&State> {
        self.state(&self.initial)
    }

    pub fn terminal_states(&self) -> Vec<&State> {
        self.states.iter().filter(|s| s.terminal).collect()
    }
}

/// Builder for [`StateMachineModel`]
#[derive(Clone, Debug)]
pub struct StateMachineBuilder {
    name: String,
    variables: Vec<VariableDecl>,
    states: Vec<State>,
    initial: Option<StateId>,
}

impl StateMachineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            states: Vec::new(),
            initial: None,
        }
    }

    pub fn variable(mut self, decl: VariableDecl) -> Self {
        self.variables.push(decl);
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Add a state and mark it initial
    pub fn initial(mut self, state: State) -> Self {
        self.initial = Some(state.id.clone());
        self.states.push(state);
        self
    }

    /// Validate the graph and freeze the model
    pub fn build(self) -> CoordinationResult<StateMachineModel> {
        let initial = self.initial.ok_or(CoordinationError::NoInitialState)?;

        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(&state.id) {
                return Err(CoordinationError::DuplicateState(state.id.clone()));
            }
        }

        for state in &self.states {
            if state.terminal && !state.transitions.is_empty() {
                return Err(CoordinationError::InvalidModel(format!(
                    "Terminal state '{}' declares outgoing transitions",
                    state.id
                )));
            }
            for transition in &state.transitions {
                if !seen.contains(&transition.target) {
                    return Err(CoordinationError::UnknownState(transition.target.clone()));
                }
            }
        }

        let mut names = HashSet::new();
        for decl in &self.variables {
            if !names.insert(decl.name.as_str()) {
                return Err(CoordinationError::InvalidModel(format!(
                    "State machine '{}' declares variable '{}' twice",
                    self.name, decl.name
                )));
            }
        }

        Ok(StateMachineModel {
            name: self.name,
            variables: self.variables,
            states: self.states,
            initial,
        })
    }
}
