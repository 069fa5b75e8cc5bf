//! Coordination Runtime
//!
//! The coordination engine runs scripts and state machines on behalf of
//! a root task. It resolves the sub-tasks each step needs, watches the
//! events they emit, advances when guards hold, and hands control to
//! prioritized fault handlers when something goes wrong.
//!
//! # Key Principle
//!
//! **The runtime coordinates, it NEVER executes tasks directly.**
//!
//! It instantiates, starts, stops and attaches tasks through a
//! [`TaskProvider`](coordination_types::TaskProvider), and learns about
//! them only through the signals an
//! [`EventSource`](coordination_types::EventSource) delivers.
//!
//! # Architecture
//!
//! The [`Coordinator`] feeds signals, one at a time, to any number of
//! [`CoordinationContext`]s. Each context composes:
//!
//! - [`Bindings`]: Scoped variables, resolved lazily on first read
//! - [`SourceResolver`]: Turns task sources into attached child tasks
//! - [`GuardEvaluator`]: Three-valued evaluation of event guards
//! - [`ScriptEngine`]: Runs instruction lists
//! - [`StateMachineEngine`]: Runs guarded state graphs
//! - [`FaultDispatcher`]: Selects, preempts, queues and escalates fault handlers
//! - [`ProvenanceTracker`]: Records every resolution, step and fault decision
//!
//! # Example
//!
//! ```rust
//! use coordination_engine::{ActionInterface, Coordinator, CoordinationContext, SimulatedPlan};
//! use coordination_types::*;
//! use std::sync::Arc;
//!
//! let mut plan = SimulatedPlan::new();
//! let root = plan.add_root("Mission");
//!
//! let actions = ActionInterface::new()
//!     .with_action(ActionModel::new("survey", "Survey"))
//!     .unwrap();
//! let script = Script::builder("patrol")
//!     .instruction(Instruction::run("survey", TaskSource::action("survey")))
//!     .build()
//!     .unwrap();
//!
//! let mut coordinator = Coordinator::new(plan);
//! let id = coordinator.add(CoordinationContext::new(root, script).with_actions(Arc::new(actions)));
//! coordinator.start(&id).unwrap();
//! coordinator.run_until_idle();
//!
//! let task = coordinator.context(&id).unwrap().current_task().unwrap().clone();
//! coordinator.provider_mut().succeed(&task);
//! coordinator.run_until_idle();
//! assert!(coordinator.context(&id).unwrap().status().is_terminal());
//! ```

#![deny(unsafe_code)]

pub mod action_interface;
pub mod bindings;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod event_log;
pub mod fault_table;
pub mod guard_evaluator;
pub mod model;
pub mod observer;
pub mod provenance_tracker;
pub mod script_engine;
pub mod sim;
pub mod source_resolver;
pub mod state_machine;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use action_interface::{ActionInterface, BuilderRegistry};
pub use bindings::{Bindings, ResolutionEnv, VariableScope};
pub use config::{
    ConfigError, ContextConfig, CoordinatorConfig, DEFAULT_MAX_DELIVERIES,
    DEFAULT_PENDING_FAULT_LIMIT,
};
pub use context::{ContextStatus, CoordinationContext, Outcome};
pub use coordinator::{Coordinator, RunReport};
pub use event_log::{EventLog, Lane, ObservedEvent, SubscriptionChange, Subscriptions};
pub use fault_table::{ActiveHandler, FaultDecision, FaultDispatcher, FaultResponseTable};
pub use guard_evaluator::{GuardEvaluator, GuardMemo, GuardScope};
pub(crate) use model::ActiveStep;
pub use model::{EngineStatus, Focus, ModelEngine, Progress, StepEnv};
pub use observer::{LifecycleObserver, RecordingObserver, SharedObserver};
pub use provenance_tracker::{
    FaultDisposition, ProvenanceEventType, ProvenanceRecord, ProvenanceTracker,
};
pub use script_engine::ScriptEngine;
pub use sim::SimulatedPlan;
pub use source_resolver::{ResolveEnv, SlotKey, SourceResolver};
pub use state_machine::StateMachineEngine;
