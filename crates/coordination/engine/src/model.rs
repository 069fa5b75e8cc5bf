//! Shared engine machinery: the step environment, progress reports and
//! the model engine that runs either kind of coordination model

use crate::{
    ActionInterface, Bindings, BuilderRegistry, EventLog, GuardEvaluator, GuardMemo, GuardScope,
    Lane, ProvenanceTracker, ResolutionEnv, ResolveEnv, ScriptEngine, SlotKey, SourceResolver,
    StateMachineEngine, Subscriptions,
};
use coordination_types::{
    AssignSource, Assignment, Completion, CoordinationError, CoordinationModel,
    CoordinationResult, EventGuard, EventName, TaskEvent, TaskHandle, TaskId, TaskProvider,
    TaskRef, TaskSource, Truth, Value,
};
use std::collections::{BTreeSet, HashMap};

/// What an engine reports after a start or a delivery
#[derive(Clone, Debug, PartialEq)]
pub enum Progress {
    /// Nothing decided yet
    Waiting,
    /// The model moved to another step
    Advanced,
    /// The model reached its end
    Finished(Completion),
    /// The model cannot continue
    Failed(CoordinationError),
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Progress::Finished(_) | Progress::Failed(_))
    }
}

/// Lifecycle of an engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Running,
    Finished,
    Failed,
    Stopped,
}

/// Everything an engine may touch while it steps.
///
/// Built by the context for the duration of one call.
pub struct StepEnv<'a> {
    pub provider: &'a mut dyn TaskProvider,
    pub resolver: &'a mut SourceResolver,
    pub bindings: &'a mut Bindings,
    pub actions: &'a ActionInterface,
    pub builders: &'a BuilderRegistry,
    pub log: &'a EventLog,
    pub subscriptions: &'a mut Subscriptions,
    pub provenance: &'a mut ProvenanceTracker,
    pub root: &'a TaskHandle,
}

impl<'a> StepEnv<'a> {
    // ── Tasks ────────────────────────────────────────────────────────

    /// Resolve a slot and make sure its task is started
    pub fn resolve(&mut self, key: SlotKey, source: &TaskSource) -> CoordinationResult<TaskHandle> {
        let fresh = self.resolver.handle(&key).is_none();
        let mut resolve_env = ResolveEnv {
            provider: &mut *self.provider,
            bindings: &mut *self.bindings,
            actions: self.actions,
            builders: self.builders,
        };
        let handle = self.resolver.resolve(&mut resolve_env, key.clone(), source)?;
        if fresh {
            self.provenance
                .record_resolved(&handle, self.resolver.role(&key));
        }
        if self.provider.state(&handle).is_pending() {
            self.provider.start(&handle)?;
        }
        Ok(handle)
    }

    pub fn retire(&mut self, key: &SlotKey) {
        if let Some(handle) = self.resolver.retire(&mut *self.provider, key) {
            self.provenance.record_retired(&handle);
        }
    }

    pub fn retire_lane(&mut self, lane: Lane) {
        for handle in self.resolver.retire_lane(&mut *self.provider, lane) {
            self.provenance.record_retired(&handle);
        }
        self.subscriptions.clear(lane);
    }

    // ── Guards ───────────────────────────────────────────────────────

    fn read(&mut self, name: &str) -> CoordinationResult<Value> {
        self.bindings.get(
            name,
            &ResolutionEnv {
                provider: &*self.provider,
                root: self.root,
            },
        )
    }

    /// Values of the variables a guard reads. Unresolvable ones are
    /// left out and read as unbound.
    fn guard_variables(&mut self, guard: &EventGuard) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        for name in GuardEvaluator::new().variables_of(guard) {
            if let Ok(value) = self.read(name) {
                values.insert(name.to_string(), value);
            }
        }
        values
    }

    pub fn evaluate(&mut self, guard: &EventGuard, focus: &Focus, memo: &mut GuardMemo) -> Truth {
        let variables = self.guard_variables(guard);
        let scope = GuardScope {
            log: self.log,
            root: &self.root.id,
            current: focus.task.as_ref(),
            since: focus.since,
            variables: &variables,
        };
        GuardEvaluator::new().evaluate(guard, &scope, memo)
    }

    /// Subscribe a lane to what its guards depend on, plus the terminal
    /// events of the step's own task
    pub fn subscribe(&mut self, lane: Lane, guards: &[&EventGuard], focus: &Focus, own: Option<&TaskId>) {
        let mut wanted = BTreeSet::new();
        for guard in guards {
            let variables = self.guard_variables(guard);
            let scope = GuardScope {
                log: self.log,
                root: &self.root.id,
                current: focus.task.as_ref(),
                since: focus.since,
                variables: &variables,
            };
            wanted.extend(GuardEvaluator::new().interest(guard, &scope));
        }
        if let Some(task) = own {
            for event in EventName::terminal_events() {
                wanted.insert((task.clone(), event));
            }
        }
        self.subscriptions.replace(lane, wanted);
    }

    // ── Effects ──────────────────────────────────────────────────────

    /// Apply a variable update at a step boundary
    pub fn assign(&mut self, assignment: &Assignment, focus: &Focus, task: Option<&TaskHandle>) -> CoordinationResult<()> {
        let value = match &assignment.source {
            AssignSource::Constant(value) => value.clone(),
            AssignSource::Payload { task: reference, event } => {
                let id = match reference {
                    TaskRef::Current => focus.task.clone(),
                    TaskRef::Root => Some(self.root.id.clone()),
                    TaskRef::Variable(name) => self.read(name)?.as_task().map(|h| h.id.clone()),
                };
                id.and_then(|id| self.log.payload(&id, event, focus.since).cloned())
                    .unwrap_or(Value::Null)
            }
            AssignSource::CurrentTask => task.cloned().map(Value::Task).unwrap_or(Value::Null),
            AssignSource::Variable(name) => self.read(name)?,
        };
        self.bindings.set(&assignment.variable, value)
    }

    pub fn emit_on_root(&mut self, event: &EventName, payload: Option<Value>) -> CoordinationResult<()> {
        tracing::debug!(root = %self.root, event = %event, "Forwarding event to root");
        self.provider.emit(self.root, event, payload)?;
        Ok(())
    }
}

/// The task a step's guards call `current`, and where its window opens
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Focus {
    pub task: Option<TaskId>,
    pub since: u64,
}

/// The step an engine is waiting in
#[derive(Clone, Debug)]
pub(crate) struct ActiveStep {
    pub key: SlotKey,
    pub task: Option<TaskHandle>,
    pub since: u64,
}

impl ActiveStep {
    /// Focus of this step, falling back to the last retired task when
    /// the step carries none
    pub fn focus(&self, last: Option<&Focus>) -> Focus {
        match (&self.task, last) {
            (Some(task), _) => Focus {
                task: Some(task.id.clone()),
                since: self.since,
            },
            (None, Some(last)) => last.clone(),
            (None, None) => Focus {
                task: None,
                since: self.since,
            },
        }
    }
}

/// Runs a script or a state machine
#[derive(Debug)]
pub enum ModelEngine {
    Script(ScriptEngine),
    StateMachine(StateMachineEngine),
}

impl ModelEngine {
    /// An idle engine for `model`, keeping its variables at scope depth
    /// `scope`
    pub fn new(model: &CoordinationModel, lane: Lane, scope: usize) -> Self {
        match model {
            CoordinationModel::Script(script) => {
                ModelEngine::Script(ScriptEngine::new(script.clone(), lane, scope))
            }
            CoordinationModel::StateMachine(machine) => {
                ModelEngine::StateMachine(StateMachineEngine::new(machine.clone(), lane, scope))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ModelEngine::Script(e) => e.name(),
            ModelEngine::StateMachine(e) => e.name(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self {
            ModelEngine::Script(e) => e.status(),
            ModelEngine::StateMachine(e) => e.status(),
        }
    }

    pub fn scope(&self) -> usize {
        match self {
            ModelEngine::Script(e) => e.scope(),
            ModelEngine::StateMachine(e) => e.scope(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == EngineStatus::Running
    }

    pub fn current_task(&self) -> Option<&TaskHandle> {
        match self {
            ModelEngine::Script(e) => e.current_task(),
            ModelEngine::StateMachine(e) => e.current_task(),
        }
    }

    /// A short description of where the engine is, for logs
    pub fn position(&self) -> String {
        match self {
            ModelEngine::Script(e) => format!("pc {}", e.pc()),
            ModelEngine::StateMachine(e) => match e.current_state() {
                Some(state) => format!("state '{}'", state),
                None => "no state".to_string(),
            },
        }
    }

    pub fn start(&mut self, env: &mut StepEnv<'_>) -> CoordinationResult<Progress> {
        match self {
            ModelEngine::Script(e) => e.start(env),
            ModelEngine::StateMachine(e) => e.start(env),
        }
    }

    pub fn on_event(&mut self, env: &mut StepEnv<'_>, event: &TaskEvent) -> Progress {
        match self {
            ModelEngine::Script(e) => e.on_event(env, event),
            ModelEngine::StateMachine(e) => e.on_event(env, event),
        }
    }

    /// Continue after a suspension, catching up on events that arrived
    /// while suspended
    pub fn resume(&mut self, env: &mut StepEnv<'_>) -> Progress {
        match self {
            ModelEngine::Script(e) => e.resume(env),
            ModelEngine::StateMachine(e) => e.resume(env),
        }
    }

    /// Drop everything and start again from the initial step
    pub fn restart(&mut self, env: &mut StepEnv<'_>) -> Progress {
        self.stop(env);
        env.bindings.reset_scope(self.scope());
        match self.start(env) {
            Ok(progress) => progress,
            Err(e) => Progress::Failed(e),
        }
    }

    /// Retire the active step's task without leaving the step
    pub fn retire_current(&mut self, env: &mut StepEnv<'_>) {
        match self {
            ModelEngine::Script(e) => e.retire_current(env),
            ModelEngine::StateMachine(e) => e.retire_current(env),
        }
    }

    pub fn stop(&mut self, env: &mut StepEnv<'_>) {
        match self {
            ModelEngine::Script(e) => e.stop(env),
            ModelEngine::StateMachine(e) => e.stop(env),
        }
    }
}
