//! Scripts: linear instruction sequences
//!
//! Each instruction drives at most one sub-task and waits on an exit
//! guard before the program counter advances. An optional entry guard
//! decides whether the instruction runs at all.

use crate::{
    Assignment, CoordinationError, CoordinationResult, EventGuard, EventName, TaskSource,
    VariableDecl,
};
use std::collections::HashSet;

/// Action run when an instruction exits
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitAction {
    Assign(Assignment),
    /// Emit an event on the coordinated root
    EmitOnRoot(EventName),
}

/// One step of a script
#[derive(Clone, Debug)]
pub struct Instruction {
    /// Label used for step outputs and provenance
    pub label: String,
    /// The sub-task to run; `None` makes this a wait step
    pub source: Option<TaskSource>,
    /// Gate deciding whether the instruction starts at all
    pub entry_guard: Option<EventGuard>,
    /// Condition for advancing past this instruction
    pub exit_guard: EventGuard,
    pub on_exit: Vec<ExitAction>,
}

impl Instruction {
    /// Start `source` and advance when it succeeds
    pub fn run(label: impl Into<String>, source: TaskSource) -> Self {
        Self {
            label: label.into(),
            source: Some(source),
            entry_guard: None,
            exit_guard: EventGuard::on_success(),
            on_exit: Vec::new(),
        }
    }

    /// Start no task and advance when `guard` holds
    pub fn wait(label: impl Into<String>, guard: EventGuard) -> Self {
        Self {
            label: label.into(),
            source: None,
            entry_guard: None,
            exit_guard: guard,
            on_exit: Vec::new(),
        }
    }

    /// Emit `event` on the root and advance immediately
    pub fn emit(label: impl Into<String>, event: impl Into<EventName>) -> Self {
        Self {
            label: label.into(),
            source: None,
            entry_guard: None,
            exit_guard: EventGuard::Always,
            on_exit: vec![ExitAction::EmitOnRoot(event.into())],
        }
    }

    pub fn until(mut self, guard: EventGuard) -> Self {
        self.exit_guard = guard;
        self
    }

    pub fn when(mut self, guard: EventGuard) -> Self {
        self.entry_guard = Some(guard);
        self
    }

    pub fn then_assign(mut self, assignment: Assignment) -> Self {
        self.on_exit.push(ExitAction::Assign(assignment));
        self
    }

    pub fn then_emit(mut self, event: impl Into<EventName>) -> Self {
        self.on_exit.push(ExitAction::EmitOnRoot(event.into()));
        self
    }
}

/// An immutable, validated script
#[derive(Clone, Debug)]
pub struct Script {
    pub name: String,
    pub variables: Vec<VariableDecl>,
    pub instructions: Vec<Instruction>,
}

impl Script {
    pub fn builder(name: impl Into<String>) -> ScriptBuilder {
        ScriptBuilder::new(name)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }
}

/// Builder for [`Script`]
#[derive(Clone, Debug)]
pub struct ScriptBuilder {
    name: String,
    variables: Vec<VariableDecl>,
    instructions: Vec<Instruction>,
}

impl ScriptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            instructions: Vec::new(),
        }
    }

    pub fn variable(mut self, decl: VariableDecl) -> Self {
        self.variables.push(decl);
        self
    }

    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Validate and freeze the script.
    ///
    /// An empty script is accepted here; starting it is what fails.
    pub fn build(self) -> CoordinationResult<Script> {
        let mut labels = HashSet::new();
        for instruction in &self.instructions {
            if !labels.insert(instruction.label.as_str()) {
                return Err(CoordinationError::InvalidModel(format!(
                    "Script '{}' has duplicate instruction label '{}'",
                    self.name, instruction.label
                )));
            }
        }
        let mut names = HashSet::new();
        for decl in &self.variables {
            if !names.insert(decl.name.as_str()) {
                return Err(CoordinationError::InvalidModel(format!(
                    "Script '{}' declares variable '{}' twice",
                    self.name, decl.name
                )));
            }
        }
        Ok(Script {
            name: self.name,
            variables: self.variables,
            instructions: self.instructions,
        })
    }
}
