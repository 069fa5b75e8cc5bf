//! Script engine: runs instructions one at a time
//!
//! Each instruction resolves its task source, starts the task and waits
//! for its exit guard. A `True` exit guard retires the task and moves
//! to the next instruction; a `False` one fails the script, since the
//! instruction can never complete. At most one instruction task is live
//! at any time.

use crate::{ActiveStep, EngineStatus, Focus, GuardMemo, Lane, Progress, SlotKey, StepEnv};
use coordination_types::{
    Completion, CompletionKind, CoordinationError, CoordinationResult, EventGuard, ExitAction,
    Instruction, Script, StepRecord, TaskEvent, TaskHandle, Terminal, Truth,
};
use std::sync::Arc;

/// Executes one [`Script`]
#[derive(Debug)]
pub struct ScriptEngine {
    script: Arc<Script>,
    lane: Lane,
    scope: usize,
    status: EngineStatus,
    pc: usize,
    step: Option<ActiveStep>,
    /// Focus of the most recently retired instruction task
    last: Option<Focus>,
    activation: u64,
    memo: GuardMemo,
    path: Vec<StepRecord>,
    recovered: bool,
    /// The active instruction's task was retired by a fault handler
    replaced: bool,
}

impl ScriptEngine {
    pub fn new(script: Arc<Script>, lane: Lane, scope: usize) -> Self {
        Self {
            script,
            lane,
            scope,
            status: EngineStatus::Idle,
            pc: 0,
            step: None,
            last: None,
            activation: 0,
            memo: GuardMemo::new(),
            path: Vec::new(),
            recovered: false,
            replaced: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.script.name
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn scope(&self) -> usize {
        self.scope
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn path(&self) -> &[StepRecord] {
        &self.path
    }

    pub fn current_task(&self) -> Option<&TaskHandle> {
        self.step.as_ref().and_then(|s| s.task.as_ref())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start at the first instruction
    pub fn start(&mut self, env: &mut StepEnv<'_>) -> CoordinationResult<Progress> {
        if self.status == EngineStatus::Running {
            return Err(CoordinationError::AlreadyRunning);
        }
        if self.script.is_empty() {
            return Err(CoordinationError::EmptyScript);
        }

        self.pc = 0;
        self.step = None;
        self.last = None;
        self.path.clear();
        self.recovered = false;
        self.replaced = false;
        self.status = EngineStatus::Running;

        tracing::info!(script = %self.script.name, lane = %self.lane, "Script started");
        Ok(self.enter(env))
    }

    /// React to a delivered event
    pub fn on_event(&mut self, env: &mut StepEnv<'_>, event: &TaskEvent) -> Progress {
        if self.status != EngineStatus::Running || self.step.is_none() || self.replaced {
            return Progress::Waiting;
        }
        self.check(env, Some(event))
    }

    /// Continue after a suspension
    pub fn resume(&mut self, env: &mut StepEnv<'_>) -> Progress {
        if self.status != EngineStatus::Running {
            return Progress::Waiting;
        }
        if self.replaced || self.step.is_none() {
            return self.enter(env);
        }
        self.check(env, None)
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
            tracing::debug!(script = %self.script.name, pc = self.pc, "Script stopped");
        }
    }

    // ── Stepping ─────────────────────────────────────────────────────

    /// Enter the instruction at `pc`, skipping instructions whose entry
    /// guard does not hold and passing through instantaneous ones
    fn enter(&mut self, env: &mut StepEnv<'_>) -> Progress {
        let script = Arc::clone(&self.script);
        loop {
            let instruction = match script.instruction(self.pc) {
                Some(instruction) => instruction,
                None => return self.finish(env),
            };
            self.activation += 1;
            self.memo.clear();
            self.replaced = false;
            let since = env.log.cursor();

            if let Some(guard) = &instruction.entry_guard {
                let focus = self.last.clone().unwrap_or(Focus { task: None, since });
                let truth = env.evaluate(guard, &focus, &mut self.memo);
                // `current` means the previous task here and this step's task below
                self.memo.clear();
                if !truth.is_true() {
                    tracing::debug!(
                        pc = self.pc,
                        label = %instruction.label,
                        entry = ?truth,
                        "Instruction skipped"
                    );
                    self.path.push(StepRecord::Skipped {
                        pc: self.pc,
                        label: instruction.label.clone(),
                    });
                    env.provenance.record_skipped(self.pc, &instruction.label);
                    self.pc += 1;
                    continue;
                }
            }

            let key = SlotKey::new(self.lane, instruction.label.clone(), self.activation);
            let task = match &instruction.source {
                Some(source) => match env.resolve(key.clone(), source) {
                    Ok(handle) => Some(handle),
                    Err(e) => return self.fail(env, e),
                },
                None => None,
            };
            tracing::debug!(
                pc = self.pc,
                label = %instruction.label,
                task = ?task.as_ref().map(|t| t.to_string()),
                "Instruction entered"
            );
            self.step = Some(ActiveStep { key, task, since });

            if instruction.exit_guard == EventGuard::Always {
                if let Err(e) = self.exit(env, instruction, None) {
                    return self.fail(env, e);
                }
                continue;
            }

            self.subscribe(env, instruction);
            return Progress::Advanced;
        }
    }

    /// Evaluate the active instruction's exit guard
    fn check(&mut self, env: &mut StepEnv<'_>, event: Option<&TaskEvent>) -> Progress {
        let script = Arc::clone(&self.script);
        let instruction = match script.instruction(self.pc) {
            Some(instruction) => instruction,
            None => return self.finish(env),
        };
        let focus = match &self.step {
            Some(step) => step.focus(self.last.as_ref()),
            None => return Progress::Waiting,
        };

        match env.evaluate(&instruction.exit_guard, &focus, &mut self.memo) {
            Truth::True => {
                if let Err(e) = self.exit(env, instruction, event) {
                    return self.fail(env, e);
                }
                self.enter(env)
            }
            Truth::False => {
                tracing::warn!(
                    script = %self.script.name,
                    pc = self.pc,
                    guard = %instruction.exit_guard,
                    "Exit guard can no longer hold"
                );
                let pc = self.pc;
                self.fail(env, CoordinationError::InstructionFailed(pc))
            }
            Truth::Pending => {
                self.subscribe(env, instruction);
                Progress::Waiting
            }
        }
    }

    /// Leave the active instruction: record its output, run its exit
    /// actions, retire its task and move `pc` forward
    fn exit(
        &mut self,
        env: &mut StepEnv<'_>,
        instruction: &Instruction,
        event: Option<&TaskEvent>,
    ) -> CoordinationResult<()> {
        let step = self.step.take().ok_or(CoordinationError::NotRunning)?;
        let focus = step.focus(self.last.as_ref());
        let via_failure = step
            .task
            .as_ref()
            .map(|task| env.log.failed(&task.id, step.since))
            .unwrap_or(false);

        if let (Some(event), Some(task)) = (event, &step.task) {
            if event.task == task.id {
                if let Some(payload) = &event.payload {
                    env.bindings
                        .record_output(self.scope, instruction.label.clone(), payload.clone());
                }
            }
        }

        for action in &instruction.on_exit {
            match action {
                ExitAction::Assign(assignment) => env.assign(assignment, &focus, step.task.as_ref())?,
                ExitAction::EmitOnRoot(name) => env.emit_on_root(name, None)?,
            }
        }

        env.retire(&step.key);
        self.path.push(StepRecord::Advanced {
            pc: self.pc,
            label: instruction.label.clone(),
            task: step.task.as_ref().map(|t| t.id.clone()),
            via_failure,
        });
        env.provenance.record_advanced(self.pc, &instruction.label);
        self.recovered |= via_failure;
        if step.task.is_some() {
            self.last = Some(focus);
        }
        self.pc += 1;
        Ok(())
    }

    fn subscribe(&mut self, env: &mut StepEnv<'_>, instruction: &Instruction) {
        if let Some(step) = &self.step {
            let focus = step.focus(self.last.as_ref());
            let own = step.task.as_ref().map(|t| &t.id);
            env.subscribe(self.lane, &[&instruction.exit_guard], &focus, own);
        }
    }

    fn finish(&mut self, env: &mut StepEnv<'_>) -> Progress {
        env.retire_lane(self.lane);
        self.step = None;
        self.status = EngineStatus::Finished;
        let kind = if self.recovered {
            CompletionKind::FailureRecovered
        } else {
            CompletionKind::Nominal
        };
        env.provenance.record_finished(&self.script.name, kind);
        tracing::info!(script = %self.script.name, kind = ?kind, "Script finished");
        Progress::Finished(Completion::new(
            self.script.name.clone(),
            Terminal::ScriptEnd {
                instructions: self.script.len(),
            },
            kind,
            self.path.clone(),
        ))
    }

    fn fail(&mut self, env: &mut StepEnv<'_>, error: CoordinationError) -> Progress {
        env.retire_lane(self.lane);
        self.step = None;
        self.status = EngineStatus::Failed;
        env.provenance.record_failed(&self.script.name, &error.to_string());
        tracing::warn!(script = %self.script.name, pc = self.pc, error = %error, "Script failed");
        Progress::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use coordination_types::{Assignment, EventGuard, TaskSource, Value, VariableDecl};

    fn run(label: &str, action: &str) -> Instruction {
        Instruction::run(label, TaskSource::action(action))
    }

    fn engine(h: &mut Harness, script: Script) -> ScriptEngine {
        let scope = h.bindings.push_scope(script.name.clone(), &script.variables);
        ScriptEngine::new(Arc::new(script), Lane::Model, scope)
    }

    #[test]
    fn test_runs_instructions_in_order() {
        let mut h = Harness::new(&[("a", "A"), ("b", "B")]);
        let script = Script::builder("s")
            .instruction(run("first", "a"))
            .instruction(run("second", "b"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, script);

        assert_eq!(engine.start(&mut h.env()).unwrap(), Progress::Advanced);
        let first = engine.current_task().unwrap().clone();
        assert_eq!(first.model, "A");

        let event = h.emit(&first, "success");
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Advanced);
        let second = engine.current_task().unwrap().clone();
        assert_eq!(second.model, "B");
        assert!(h.plan.was_stopped(&first.id) || h.plan.state_of(&first.id).is_terminal());
        assert_eq!(h.resolver.live_count(), 1);

        let event = h.emit(&second, "success");
        match engine.on_event(&mut h.env(), &event) {
            Progress::Finished(completion) => {
                assert!(completion.is_nominal());
                assert_eq!(completion.steps_taken(), 2);
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert_eq!(h.resolver.live_count(), 0);
    }

    #[test]
    fn test_start_rejections() {
        let mut h = Harness::new(&[("a", "A")]);
        let mut empty = engine(&mut h, Script::builder("empty").build().unwrap());
        assert_eq!(
            empty.start(&mut h.env()),
            Err(CoordinationError::EmptyScript)
        );

        let script = Script::builder("s").instruction(run("a", "a")).build().unwrap();
        let mut running = engine(&mut h, script);
        running.start(&mut h.env()).unwrap();
        assert_eq!(
            running.start(&mut h.env()),
            Err(CoordinationError::AlreadyRunning)
        );
        assert_eq!(h.resolver.live_count(), 1);
    }

    #[test]
    fn test_unsatisfiable_exit_guard_fails_instruction() {
        let mut h = Harness::new(&[("a", "A")]);
        let script = Script::builder("s").instruction(run("a", "a")).build().unwrap();
        let mut engine = engine(&mut h, script);
        engine.start(&mut h.env()).unwrap();
        let task = engine.current_task().unwrap().clone();

        let event = h.emit(&task, "failed");
        assert_eq!(
            engine.on_event(&mut h.env(), &event),
            Progress::Failed(CoordinationError::InstructionFailed(0))
        );
        assert_eq!(engine.status(), EngineStatus::Failed);
        assert_eq!(h.resolver.live_count(), 0);
    }

    #[test]
    fn test_failure_path_recovers() {
        let mut h = Harness::new(&[("a", "A"), ("b", "B")]);
        let script = Script::builder("s")
            .instruction(run("try", "a").until(EventGuard::on("stop")))
            .instruction(run("after", "b"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, script);
        engine.start(&mut h.env()).unwrap();
        let task = engine.current_task().unwrap().clone();
        let event = h.emit(&task, "failed");
        engine.on_event(&mut h.env(), &event);

        let next = engine.current_task().unwrap().clone();
        let event = h.emit(&next, "success");
        match engine.on_event(&mut h.env(), &event) {
            Progress::Finished(completion) => {
                assert_eq!(completion.kind, CompletionKind::FailureRecovered);
                assert!(completion.path[0].via_failure());
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_guard_skips_instruction() {
        let mut h = Harness::new(&[("a", "A"), ("b", "B"), ("c", "C")]);
        let script = Script::builder("s")
            .instruction(run("first", "a").until(EventGuard::on("stop")))
            .instruction(run("cleanup", "b").when(EventGuard::on_failure()))
            .instruction(run("last", "c"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, script);
        engine.start(&mut h.env()).unwrap();
        let first = engine.current_task().unwrap().clone();
        let event = h.emit(&first, "success");
        engine.on_event(&mut h.env(), &event);

        assert_eq!(engine.current_task().unwrap().model, "C");
        assert_eq!(engine.pc(), 2);
        assert!(matches!(engine.path()[1], StepRecord::Skipped { pc: 1, .. }));
    }

    #[test]
    fn test_exit_actions_and_step_output() {
        let mut h = Harness::new(&[("locate", "Locate")]);
        let script = Script::builder("s")
            .variable(VariableDecl::step_output("pose", "find"))
            .variable(VariableDecl::assigned("finder"))
            .instruction(
                run("find", "locate")
                    .then_assign(Assignment::current_task("finder"))
                    .then_emit("located"),
            )
            .instruction(Instruction::wait("hold", EventGuard::forwarded("go")))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, script);
        engine.start(&mut h.env()).unwrap();
        let task = engine.current_task().unwrap().clone();

        let event = h.emit_with(&task, "success", Value::Int(42));
        assert_eq!(engine.on_event(&mut h.env(), &event), Progress::Advanced);
        assert_eq!(h.bindings.output("find"), Some(&Value::Int(42)));
        assert_eq!(h.bindings.peek("finder"), Some(&Value::Task(task.clone())));
        assert_eq!(h.plan.emitted_on(&h.root.id), vec!["located".to_string()]);
        assert!(engine.current_task().is_none());

        let root = h.root.clone();
        let event = h.emit(&root, "go");
        assert!(matches!(
            engine.on_event(&mut h.env(), &event),
            Progress::Finished(_)
        ));
    }

    #[test]
    fn test_instantaneous_emit_instruction() {
        let mut h = Harness::new(&[]);
        let script = Script::builder("s")
            .instruction(Instruction::emit("announce", "ready"))
            .build()
            .unwrap();
        let mut engine = engine(&mut h, script);
        assert!(matches!(
            engine.start(&mut h.env()).unwrap(),
            Progress::Finished(_)
        ));
        assert_eq!(h.plan.emitted_on(&h.root.id), vec!["ready".to_string()]);
    }

    #[test]
    fn test_resolution_failure_fails_script() {
        let mut h = Harness::new(&[]);
        let script = Script::builder("s").instruction(run("x", "missing")).build().unwrap();
        let mut engine = engine(&mut h, script);
        assert!(matches!(
            engine.start(&mut h.env()).unwrap(),
            Progress::Failed(CoordinationError::UnresolvableSource(_))
        ));
    }

    #[test]
    fn test_replaced_task_is_re_resolved_on_resume() {
        let mut h = Harness::new(&[("a", "A")]);
        let script = Script::builder("s").instruction(run("a", "a")).build().unwrap();
        let mut engine = engine(&mut h, script);
        engine.start(&mut h.env()).unwrap();
        let before = engine.current_task().unwrap().clone();

        engine.retire_current(&mut h.env());
        assert!(engine.current_task().is_none());
        assert_eq!(h.resolver.live_count(), 0);

        assert_eq!(engine.resume(&mut h.env()), Progress::Advanced);
        let after = engine.current_task().unwrap().clone();
        assert_ne!(before.id, after.id);
        assert_eq!(h.plan.instantiations().len(), 2);
    }
}
