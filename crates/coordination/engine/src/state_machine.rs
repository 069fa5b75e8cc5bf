//! State machine engine: drives a graph of task-bearing states
//!
//! Entering a state resolves and starts its task. On every delivery the
//! state's transitions are evaluated in declaration order and the first
//! satisfied one fires. If every guard is decided `False` the machine
//! fails, since nothing can move it anymore.

use crate::{ActiveStep, EngineStatus, Focus, GuardMemo, Lane, Progress, SlotKey, StepEnv};
use coordination_types::{
    Completion, CompletionKind, CoordinationError, CoordinationResult, EventGuard, EventName,
    State, StateId, StateMachineModel, StepRecord, TaskEvent, TaskHandle, Terminal, Truth,
};
use std::sync::Arc;

/// Executes one [`StateMachineModel`]
#[derive(Debug)]
pub struct StateMachineEngine {
    machine: Arc<StateMachineModel>,
    lane: Lane,
    scope: usize,
    status: EngineStatus,
    state: Option<StateId>,
    step: Option<ActiveStep>,
    last: Option<Focus>,
    activation: u64,
    memo: GuardMemo,
    path: Vec<StepRecord>,
    /// The transition into the current state was taken on a failure
    entered_via_failure: bool,
    replaced: bool,
}

impl StateMachineEngine {
    pub fn new(machine: Arc<StateMachineModel>, lane: Lane, scope: usize) -> Self {
        Self {
            machine,
            lane,
            scope,
            status: EngineStatus::Idle,
            state: None,
            step: None,
            last: None,
            activation: 0,
            memo: GuardMemo::new(),
            path: Vec::new(),
            entered_via_failure: false,
            replaced: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.machine.name
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn scope(&self) -> usize {
        self.scope
    }

    pub fn current_state(&self) -> Option<&StateId> {
        self.state.as_ref()
    }

    pub fn path(&self) -> &[StepRecord] {
        &self.path
    }

    pub fn current_task(&self) -> Option<&TaskHandle> {
        self.step.as_ref().and_then(|s| s.task.as_ref())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Enter the initial state
    pub fn start(&mut self, env: &mut StepEnv<'_>) -> CoordinationResult<Progress> {
        if self.status == EngineStatus::Running {
            return Err(CoordinationError::AlreadyRunning);
        }

        self.state = None;
        self.step = None;
        self.last = None;
        self.path.clear();
        self.entered_via_failure = false;
        self.replaced = false;
        self.status = EngineStatus::Running;

        tracing::info!(
            machine = %self.machine.name,
            initial = %self.machine.initial,
            lane = %self.lane,
            "State machine started"
        );
        let initial = self.machine.initial.clone();
        Ok(self.enter(env, initial))
    }

    /// React to a delivered event: forward what the state forwards, then
    /// look for a transition
    pub fn on_event(&mut self, env: &mut StepEnv<'_>, event: &TaskEvent) -> Progress {
        if self.status != EngineStatus::Running || self.replaced {
            return Progress::Waiting;
        }
        let machine = Arc::clone(&self.machine);
        let state = match self.state.as_ref().and_then(|id| machine.state(id)) {
            Some(state) => state,
            None => return Progress::Waiting,
        };

        let own = self.current_task().map(|t| t.id.clone());
        if own.as_ref() == Some(&event.task) {
            for forward in state.forwards.iter().filter(|f| f.from == event.name) {
                if let Err(e) = env.emit_on_root(&forward.to, event.payload.clone()) {
                    return self.fail(env, e);
                }
            }
        }

        self.check(env, state)
    }

    /// Continue after a suspension
    pub fn resume(&mut self, env: &mut StepEnv<'_>) -> Progress {
        if self.status != EngineStatus::Running {
            return Progress::Waiting;
        }
        let current = match &self.state {
            Some(state) => state.clone(),
            None => return Progress::Waiting,
        };
        if self.replaced || self.step.is_none() {
            return self.enter(env, current);
        }
        let machine = Arc::clone(&self.machine);
        match machine.state(&current) {
            Some(state) => self.check(env, state),
            None => self.fail(env, CoordinationError::UnknownState(current)),
        }
    }

    pub fn retire_current(&mut self, env: &mut StepEnv<'_>) {
        if let Some(step) = &mut self.step {
            if step.task.take().is_some() {
                env.retire(&step.key);
                env.subscriptions.clear(self.lane);
                self.replaced = true;
            }
        }
    }

    pub fn stop(&mut self, env: &mut StepEnv<'_>) {
        env.retire_lane(self.lane);
        self.step = None;
        if self.status == EngineStatus::Running {
            self.status = EngineStatus::Stopped;
            tracing::debug!(machine = %self.machine.name, state = ?self.state, "State machine stopped");
        }
    }

    // ── Stepping ─────────────────────────────────────────────────────

    fn enter(&mut self, env: &mut StepEnv<'_>, id: StateId) -> Progress {
        let machine = Arc::clone(&self.machine);
        let state = match machine.state(&id) {
            Some(state) => state,
            None => return self.fail(env, CoordinationError::UnknownState(id)),
        };
        self.activation += 1;
        self.memo.clear();
        self.replaced = false;
        self.state = Some(id.clone());
        let since = env.log.cursor();

        if state.is_final_marker() {
            return self.finish(env, id);
        }

        let key = SlotKey::new(self.lane, id.as_str(), self.activation);
        let task = match &state.source {
            Some(source) => match env.resolve(key.clone(), source) {
                Ok(handle) => Some(handle),
                Err(e) => return self.fail(env, e),
            },
            None => None,
        };
        tracing::debug!(
            machine = %self.machine.name,
            state = %id,
            task = ?task.as_ref().map(|t| t.to_string()),
            "State entered"
        );
        self.step = Some(ActiveStep { key, task, since });
        self.subscribe(env, state);
        Progress::Advanced
    }

    fn check(&mut self, env: &mut StepEnv<'_>, state: &State) -> Progress {
        let (focus, own, since) = match &self.step {
            Some(step) => (
                step.focus(self.last.as_ref()),
                step.task.as_ref().map(|t| t.id.clone()),
                step.since,
            ),
            None => return Progress::Waiting,
        };

        if state.terminal {
            // A terminal state with a task ends the model when that task succeeds
            return match own {
                Some(task) if env.log.occurred(&task, &EventName::success(), since) => {
                    self.finish(env, state.id.clone())
                }
                Some(task) if env.log.finished(&task, since) => {
                    self.fail(env, CoordinationError::NoApplicableTransition(state.id.clone()))
                }
                Some(_) => Progress::Waiting,
                None => self.finish(env, state.id.clone()),
            };
        }

        let mut all_false = true;
        for (index, transition) in state.transitions.iter().enumerate() {
            match env.evaluate(&transition.guard, &focus, &mut self.memo) {
                Truth::True => return self.take(env, state, index),
                Truth::False => {}
                Truth::Pending => all_false = false,
            }
        }

        let task_done = own
            .as_ref()
            .map(|task| env.log.finished(task, since))
            .unwrap_or(false);
        let stuck = if state.transitions.is_empty() {
            task_done
        } else {
            all_false
        };
        if stuck {
            tracing::warn!(
                machine = %self.machine.name,
                state = %state.id,
                "Every transition guard is false"
            );
            return self.fail(env, CoordinationError::NoApplicableTransition(state.id.clone()));
        }

        self.subscribe(env, state);
        Progress::Waiting
    }

    fn take(&mut self, env: &mut StepEnv<'_>, state: &State, index: usize) -> Progress {
        let transition = &state.transitions[index];
        let step = match self.step.take() {
            Some(step) => step,
            None => return Progress::Waiting,
        };
        let focus = step.focus(self.last.as_ref());
        let via_failure = step
            .task
            .as_ref()
            .map(|task| env.log.failed(&task.id, step.since))
            .unwrap_or(false);

        for update in &transition.updates {
            if let Err(e) = env.assign(update, &focus, step.task.as_ref()) {
                return self.fail(env, e);
            }
        }

        env.retire(&step.key);
        self.path.push(StepRecord::Transition {
            from: state.id.clone(),
            to: transition.target.clone(),
            index,
            via_failure,
        });
        env.provenance.record_transition(&state.id, &transition.target);
        tracing::debug!(
            machine = %self.machine.name,
            from = %state.id,
            to = %transition.target,
            guard = %transition.guard,
            via_failure,
            "Transition fired"
        );

        self.entered_via_failure = via_failure;
        if step.task.is_some() {
            self.last = Some(focus);
        }
        self.enter(env, transition.target.clone())
    }

    fn subscribe(&mut self, env: &mut StepEnv<'_>, state: &State) {
        let step = match &self.step {
            Some(step) => step,
            None => return,
        };
        let focus = step.focus(self.last.as_ref());
        let own = step.task.as_ref().map(|t| t.id.clone());

        let forwards: Vec<EventGuard> = state
            .forwards
            .iter()
            .map(|f| EventGuard::on(f.from.clone()))
            .collect();
        let guards: Vec<&EventGuard> = state
            .transitions
            .iter()
            .map(|t| &t.guard)
            .chain(forwards.iter())
            .collect();
        env.subscribe(self.lane, &guards, &focus, own.as_ref());
    }

    fn finish(&mut self, env: &mut StepEnv<'_>, terminal: StateId) -> Progress {
        env.retire_lane(self.lane);
        self.step = None;
        self.status = EngineStatus::Finished;
        let kind = if self.entered_via_failure {
            CompletionKind::FailureRecovered
        } else {
            CompletionKind::Nominal
        };
        env.provenance.record_finished(&self.machine.name, kind);
        tracing::info!(
            machine = %self.machine.name,
            terminal = %terminal,
            kind = ?kind,
            "State machine finished"
        );
        Progress::Finished(Completion::new(
            self.machine.name.clone(),
            Terminal::State(terminal),
            kind,
            self.path.clone(),
        ))
    }

    fn fail(&mut self, env: &mut StepEnv<'_>, error: CoordinationError) -> Progress {
        env.retire_lane(self.lane);
        self.step = None;
        self.status = EngineStatus::Failed;
        env.provenance
            .record_failed(&self.machine.name, &error.to_string());
        tracing::warn!(
            machine = %self.machine.name,
            state = ?self.state,
            error = %error,
            "State machine failed"
        );
        Progress::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use coordination_types::{Assignment, TaskSource, Transition, Value, VariableDecl};

    fn engine(h: &mut Harness, machine: StateMachineModel) -> StateMachineEngine {
        let scope = h.bindings.push_scope(machine.name.clone(), &machine.variables);
        StateMachineEngine::new(Arc::new(machine), Lane::Model, scope)
    }

    fn docking() -> StateMachineModel {
        StateMachineModel::builder("docking")
            .initial(
                State::new("approach", TaskSource::action("approach"))
                    .transition(EventGuard::on_success(), "dock")
                    .transition(EventGuard::on_failure(), "abort"),
            )
            .state(State::new("dock", TaskSource::action("dock")).terminal())
            .state(State::final_marker("abort"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_nominal_path() {
        let mut h = Harness::new(&[("approach", "Approach"), ("dock", "Dock")]);
        let mut engine = engine(&mut h, docking());
        engine.start(&mut h.env()).unwrap();
        let approach = engine.current_task().unwrap().clone();

        let event = h.emit(&approach, "success");
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Advanced);
        assert_eq!(engine.current_state(), Some(&StateId::new("dock")));

        let dock = engine.current_task().unwrap().clone();
        let event = h.emit(&dock, "success");
        match engine.on_event(&mut h.env(), &event) {
            Progress::Finished(completion) => {
                assert_eq!(completion.terminal, Terminal::State(StateId::new("dock")));
                assert!(completion.is_nominal());
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert_eq!(h.resolver.live_count(), 0);
    }

    #[test]
    fn test_failure_path_is_recovered_completion() {
        let mut h = Harness::new(&[("approach", "Approach"), ("dock", "Dock")]);
        let mut engine = engine(&mut h, docking());
        engine.start(&mut h.env()).unwrap();
        let approach = engine.current_task().unwrap().clone();

        let event = h.emit(&approach, "failed");
        match engine.on_event(&mut h.env(), &event) {
            Progress::Finished(completion) => {
                assert_eq!(completion.kind, CompletionKind::FailureRecovered);
                assert_eq!(completion.terminal, Terminal::State(StateId::new("abort")));
                assert!(completion.last_transition().unwrap().via_failure());
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn test_terminal_task_failure_fails_machine() {
        let mut h = Harness::new(&[("approach", "Approach"), ("dock", "Dock")]);
        let mut engine = engine(&mut h, docking());
        engine.start(&mut h.env()).unwrap();
        let approach = engine.current_task().unwrap().clone();
        let event = h.emit(&approach, "success");
        engine.on_event(&mut h.env(), &event);

        let dock = engine.current_task().unwrap().clone();
        let event = h.emit(&dock, "failed");
        assert_eq!(
            engine.on_event(&mut h.env(), &event),
            Progress::Failed(CoordinationError::NoApplicableTransition(StateId::new("dock")))
        );
    }

    #[test]
    fn test_all_false_guards_fail() {
        let mut h = Harness::new(&[("scan", "Scan")]);
        let machine = StateMachineModel::builder("m")
            .initial(State::new("scan", TaskSource::action("scan")).transition(EventGuard::on_success(), "done"))
            .state(State::final_marker("done"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, machine);
        engine.start(&mut h.env()).unwrap();
        let scan = engine.current_task().unwrap().clone();

        let event = h.emit(&scan, "failed");
        assert_eq!(
            engine.on_event(&mut h.env(), &event),
            Progress::Failed(CoordinationError::NoApplicableTransition(StateId::new("scan")))
        );
        assert_eq!(h.resolver.live_count(), 0);
    }

    #[test]
    fn test_first_declared_transition_wins() {
        let mut h = Harness::new(&[("scan", "Scan")]);
        let machine = StateMachineModel::builder("m")
            .initial(
                State::new("scan", TaskSource::action("scan"))
                    .transition(EventGuard::on("stop"), "first")
                    .transition(EventGuard::on_success(), "second"),
            )
            .state(State::final_marker("first"))
            .state(State::final_marker("second"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, machine);
        engine.start(&mut h.env()).unwrap();
        let scan = engine.current_task().unwrap().clone();
        let event = h.emit(&scan, "success");
        match engine.on_event(&mut h.env(), &event) {
            Progress::Finished(completion) => {
                assert_eq!(completion.terminal, Terminal::State(StateId::new("first")));
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn test_self_transition_resolves_fresh_task() {
        let mut h = Harness::new(&[("scan", "Scan")]);
        let machine = StateMachineModel::builder("m")
            .initial(
                State::new("scan", TaskSource::action("scan"))
                    .transition(EventGuard::on("partial"), "scan")
                    .transition(EventGuard::on_success(), "done"),
            )
            .state(State::final_marker("done"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, machine);
        engine.start(&mut h.env()).unwrap();
        let first = engine.current_task().unwrap().clone();

        let event = h.emit(&first, "partial");
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Advanced);
        let second = engine.current_task().unwrap().clone();
        assert_ne!(first.id, second.id);
        assert!(h.plan.was_stopped(&first.id));
        assert_eq!(h.resolver.live_count(), 1);
    }

    #[test]
    fn test_forwarding_and_updates() {
        let mut h = Harness::new(&[("scan", "Scan")]);
        let machine = StateMachineModel::builder("m")
            .variable(VariableDecl::assigned("found"))
            .initial(
                State::new("scan", TaskSource::action("scan"))
                    .forward("target_seen", "contact")
                    .with_transition(
                        Transition::new(EventGuard::on_success(), "done")
                            .with_update(Assignment::capture("found", "target_seen")),
                    ),
            )
            .state(State::final_marker("done"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, machine);
        engine.start(&mut h.env()).unwrap();
        let scan = engine.current_task().unwrap().clone();

        let event = h.emit_with(&scan, "target_seen", Value::text("buoy"));
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Waiting);
        assert_eq!(h.plan.emitted_on(&h.root.id), vec!["contact".to_string()]);

        let event = h.emit(&scan, "success");
        assert!(matches!(engine.on_event(&mut h.env(), &event), Progress::Finished(_)));
        assert_eq!(h.bindings.peek("found"), Some(&Value::text("buoy")));
    }

    #[test]
    fn test_waiting_state_on_variable() {
        let mut h = Harness::new(&[]);
        let machine = StateMachineModel::builder("m")
            .initial(State::waiting("idle").transition(EventGuard::variable_equals("mode", "go"), "done"))
            .state(State::final_marker("done"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, machine);
        engine.start(&mut h.env()).unwrap();

        let root = h.root.clone();
        let event = h.emit(&root, "tick");
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Waiting);

        h.bindings.set("mode", Value::text("go")).unwrap();
        let event = h.emit(&root, "tick");
        assert!(matches!(engine.on_event(&mut h.env(), &event), Progress::Finished(_)));
    }

    #[test]
    fn test_already_running() {
        let mut h = Harness::new(&[("approach", "Approach"), ("dock", "Dock")]);
        let mut engine = engine(&mut h, docking());
        engine.start(&mut h.env()).unwrap();
        assert_eq!(engine.start(&mut h.env()), Err(CoordinationError::AlreadyRunning));
    }
}
