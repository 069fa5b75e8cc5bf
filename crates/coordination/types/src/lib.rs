//! Coordination Model Types
//!
//! A coordination model drives long-lived sub-tasks on behalf of a root
//! task. Sub-tasks are not functions that return values: they emit
//! lifecycle and domain events over time, and the model advances when
//! those events satisfy its guards.
//!
//! # Key Concepts
//!
//! - **Script**: an ordered list of instructions. Each instruction starts
//!   a sub-task and waits on an exit guard before advancing.
//! - **StateMachineModel**: a graph of states, each bound to a task
//!   source, with guarded transitions between them.
//! - **EventGuard**: a three-valued boolean expression over observed
//!   events (`True`, `False`, or `Pending`).
//! - **TaskSource**: how a step obtains its sub-task (an action, a
//!   registered builder, a variable, or an as-plan description).
//! - **FaultResponseEntry**: a prioritized fault predicate with a handler
//!   model that runs in place of the normal flow.
//! - **Completion**: the terminal record of a model, including the path
//!   that led there.
//!
//! # Design Principles
//!
//! 1. Models coordinate, never execute. Task lifecycle belongs to the
//!    external [`TaskProvider`]; the model only decides when to start and
//!    stop what it resolved.
//! 2. Task failures are events, not errors. A model fails only when no
//!    guard covers the failure path.
//! 3. Models are immutable once built and validated.

#![deny(unsafe_code)]

mod action;
mod completion;
mod errors;
mod event;
mod fault;
mod guard;
mod ids;
mod provider;
mod script;
mod source;
mod state_machine;
mod task;
mod value;
mod variable;

pub use action::*;
pub use completion::*;
pub use errors::*;
pub use event::*;
pub use fault::*;
pub use guard::*;
pub use ids::*;
pub use provider::*;
pub use script::*;
pub use source::*;
pub use state_machine::*;
pub use task::*;
pub use value::*;
pub use variable::*;
