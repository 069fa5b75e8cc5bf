//! Coordination context: one root task, one model, its fault tables
//!
//! The context owns everything a running model needs: variable scopes,
//! the children it attached, the events it observed and the fault
//! handlers it may run. It is driven from the outside, one signal at a
//! time, and reports how each delivery changed it.
//!
//! **The context coordinates, it never executes.** Task lifecycle stays
//! with the [`TaskProvider`]; the context only resolves, starts and
//! retires what its model asks for.

use crate::{
    ActionInterface, ActiveHandler, Bindings, BuilderRegistry, ContextConfig, EventLog,
    FaultDecision, FaultDisposition, FaultDispatcher, FaultResponseTable, Lane,
    LifecycleObserver, ModelEngine, Progress, ProvenanceTracker, SourceResolver, StepEnv,
    SubscriptionChange, Subscriptions,
};
use coordination_types::{
    Completion, CompletionKind, ContextId, CoordinationError, CoordinationModel,
    CoordinationResult, EntryState, Fault, FaultScope, Resumption, Signal, TaskEvent, TaskHandle,
    TaskProvider, Value,
};
use std::sync::Arc;

/// Where a context is in its life
#[derive(Clone, Debug, PartialEq)]
pub enum ContextStatus {
    Created,
    Running,
    Succeeded(Completion),
    Recovered(Completion),
    Failed(CoordinationError),
    Stopped,
}

impl ContextStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContextStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContextStatus::Created | ContextStatus::Running)
    }
}

/// How one start, delivery or stop changed a context
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The context was not interested or not running
    Ignored,
    Waiting,
    Advanced,
    /// A fault handler took over
    HandlerStarted { entry: String },
    /// A handler ran to completion at once and the model resumed
    FaultResolved { entry: String },
    /// The fault waits behind the active handler
    FaultQueued,
    /// No fault table in scope matched
    FaultUnhandled,
    Succeeded(Completion),
    Recovered(Completion),
    Failed(CoordinationError),
    Stopped,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Succeeded(_) | Outcome::Recovered(_) | Outcome::Failed(_) | Outcome::Stopped
        )
    }
}

/// The parts of a context engines step against
struct ContextCore {
    root: TaskHandle,
    actions: Arc<ActionInterface>,
    builders: Arc<BuilderRegistry>,
    bindings: Bindings,
    resolver: SourceResolver,
    log: EventLog,
    subscriptions: Subscriptions,
    provenance: ProvenanceTracker,
}

impl ContextCore {
    fn env<'a>(&'a mut self, provider: &'a mut dyn TaskProvider) -> StepEnv<'a> {
        StepEnv {
            provider,
            resolver: &mut self.resolver,
            bindings: &mut self.bindings,
            actions: &self.actions,
            builders: &self.builders,
            log: &self.log,
            subscriptions: &mut self.subscriptions,
            provenance: &mut self.provenance,
            root: &self.root,
        }
    }

    /// Scope filter for one fault, computed against the children
    /// attached right now
    fn scope_filter(&self, fault: &Fault) -> impl Fn(FaultScope) -> bool {
        let local = fault.origin == self.root.id || self.resolver.is_child(&fault.origin);
        let propagating = local
            || fault.involves(&self.root.id)
            || self.resolver.children().any(|child| fault.involves(&child.id));
        move |scope| match scope {
            FaultScope::Local => local,
            FaultScope::Propagating => propagating,
        }
    }
}

/// A running coordination model bound to one root task
pub struct CoordinationContext {
    id: ContextId,
    config: ContextConfig,
    model_def: CoordinationModel,
    core: ContextCore,
    model: ModelEngine,
    faults: FaultDispatcher,
    observer: Option<Box<dyn LifecycleObserver>>,
    status: ContextStatus,
    deliveries: u64,
}

impl CoordinationContext {
    /// Create a context for `root`, running `model` once started
    pub fn new(root: TaskHandle, model: impl Into<CoordinationModel>) -> Self {
        let model_def = model.into();
        let id = ContextId::generate();
        let config = ContextConfig::default();

        let mut bindings = Bindings::new();
        let scope = bindings.push_scope(model_def.name(), model_def.variables());
        let engine = ModelEngine::new(&model_def, Lane::Model, scope);

        Self {
            core: ContextCore {
                resolver: SourceResolver::new(root.clone(), config.role_prefix.clone()),
                root,
                actions: Arc::new(ActionInterface::new()),
                builders: Arc::new(BuilderRegistry::new()),
                bindings,
                log: EventLog::new(),
                subscriptions: Subscriptions::new(),
                provenance: ProvenanceTracker::new(id.clone()),
            },
            faults: FaultDispatcher::new(config.pending_fault_limit),
            id,
            config,
            model_def,
            model: engine,
            observer: None,
            status: ContextStatus::Created,
            deliveries: 0,
        }
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.core.resolver = SourceResolver::new(self.core.root.clone(), config.role_prefix.clone());
        self.core.provenance = if config.record_provenance {
            ProvenanceTracker::new(self.id.clone())
        } else {
            ProvenanceTracker::disabled(self.id.clone())
        };
        self.faults.set_limit(config.pending_fault_limit);
        self.config = config;
        self
    }

    pub fn with_actions(mut self, actions: Arc<ActionInterface>) -> Self {
        self.core.actions = actions;
        self
    }

    pub fn with_builders(mut self, builders: Arc<BuilderRegistry>) -> Self {
        self.core.builders = builders;
        self
    }

    /// Add an enclosing fault table; the first one added is the innermost
    pub fn with_fault_table(mut self, table: FaultResponseTable) -> Self {
        self.faults.add_table(table);
        self
    }

    pub fn with_observer(mut self, observer: impl LifecycleObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn root(&self) -> &TaskHandle {
        &self.core.root
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn status(&self) -> &ContextStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// The normal model is paused while a fault handler runs
    pub fn is_suspended(&self) -> bool {
        self.faults.is_handling()
    }

    pub fn model_name(&self) -> &str {
        self.model_def.name()
    }

    /// Where the normal model is, for logs and inspection
    pub fn position(&self) -> String {
        self.model.position()
    }

    /// Task of the normal model's active step
    pub fn current_task(&self) -> Option<&TaskHandle> {
        self.model.current_task()
    }

    /// Name of the entry whose handler is running
    pub fn active_handler(&self) -> Option<&str> {
        let active = self.faults.active()?;
        self.faults
            .entry(active.table, active.entry)
            .map(|e| e.name.as_str())
    }

    /// Task of the active handler's step
    pub fn handler_task(&self) -> Option<&TaskHandle> {
        self.faults.active().and_then(|a| a.engine.current_task())
    }

    pub fn entry_state(&self, table: usize, entry: usize) -> Option<EntryState> {
        self.faults.entry_state(table, entry)
    }

    pub fn pending_faults(&self) -> usize {
        self.faults.pending_len()
    }

    /// Every child the context currently has attached
    pub fn children(&self) -> Vec<TaskHandle> {
        self.core.resolver.children().cloned().collect()
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.core.bindings.peek(name)
    }

    pub fn provenance(&self) -> &ProvenanceTracker {
        &self.core.provenance
    }

    pub fn log(&self) -> &EventLog {
        &self.core.log
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.core.subscriptions
    }

    /// Signals delivered while running
    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    /// Whether a signal concerns this context
    pub fn wants(&self, signal: &Signal) -> bool {
        if !self.is_running() {
            return false;
        }
        let core = &self.core;
        match signal {
            Signal::Event(event) => {
                event.task == core.root.id
                    || core.resolver.is_child(&event.task)
                    || core.subscriptions.wants(&event.task, &event.name)
            }
            Signal::Fault(fault) => {
                fault.involves(&core.root.id)
                    || core.resolver.children().any(|child| fault.involves(&child.id))
            }
        }
    }

    /// Subscription changes to forward to the event source
    pub fn take_subscription_changes(&mut self) -> Vec<SubscriptionChange> {
        self.core.subscriptions.take_changes()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the normal model
    pub fn start(&mut self, provider: &mut dyn TaskProvider) -> CoordinationResult<Outcome> {
        if self.status != ContextStatus::Created {
            return Err(CoordinationError::AlreadyRunning);
        }
        self.status = ContextStatus::Running;
        self.core.provenance.record_started(self.model_def.name());
        tracing::info!(
            context = %self.id,
            root = %self.core.root,
            model = %self.model_def.name(),
            "Coordination context started"
        );

        let started = {
            let mut env = self.core.env(provider);
            self.model.start(&mut env)
        };
        match started {
            Ok(progress) => Ok(self.settle_model(provider, progress)),
            Err(e) => {
                self.conclude_failure(provider, e.clone());
                Err(e)
            }
        }
    }

    /// Deliver one signal
    pub fn deliver(&mut self, provider: &mut dyn TaskProvider, signal: &Signal) -> Outcome {
        match signal {
            Signal::Event(event) => self.handle_event(provider, event),
            Signal::Fault(fault) => self.handle_fault(provider, fault.clone()),
        }
    }

    /// Record an event and let the running engine react to it.
    ///
    /// While a handler runs the normal model only records; it catches
    /// up when it resumes.
    pub fn handle_event(&mut self, provider: &mut dyn TaskProvider, event: &TaskEvent) -> Outcome {
        if !self.is_running() {
            return Outcome::Ignored;
        }
        self.deliveries += 1;
        self.core.log.record(event);

        if event.task == self.core.root.id && event.name.is_terminal() {
            tracing::info!(context = %self.id, event = %event.name, "Root task ended");
            return self.halt(provider, "root task ended");
        }

        if let Some(active) = self.faults.active_mut() {
            let progress = {
                let mut env = self.core.env(provider);
                active.engine.on_event(&mut env, event)
            };
            return self.settle_handler(provider, progress);
        }

        let progress = {
            let mut env = self.core.env(provider);
            self.model.on_event(&mut env, event)
        };
        self.settle_model(provider, progress)
    }

    /// Route a fault through the fault tables
    pub fn handle_fault(&mut self, provider: &mut dyn TaskProvider, fault: Fault) -> Outcome {
        if !self.is_running() {
            return Outcome::Ignored;
        }
        self.deliveries += 1;

        let in_scope = self.core.scope_filter(&fault);
        match self.faults.decide(&fault, &in_scope) {
            FaultDecision::Unhandled => {
                tracing::warn!(context = %self.id, fault = %fault, "No fault response in scope");
                self.core
                    .provenance
                    .record_fault(&fault, FaultDisposition::Unhandled, None);
                Outcome::FaultUnhandled
            }
            FaultDecision::Queue => {
                if let Some(dropped) = self.faults.enqueue(fault.clone()) {
                    tracing::warn!(
                        context = %self.id,
                        fault = %dropped,
                        limit = self.config.pending_fault_limit,
                        "Fault queue full; dropping oldest"
                    );
                    self.core
                        .provenance
                        .record_fault(&dropped, FaultDisposition::Dropped, None);
                }
                self.core
                    .provenance
                    .record_fault(&fault, FaultDisposition::Queued, None);
                Outcome::FaultQueued
            }
            FaultDecision::Preempt { table, entry } => {
                if let Some(displaced) = self.abandon_handler(provider) {
                    tracing::info!(context = %self.id, fault = %displaced, "Handler preempted");
                    self.core
                        .provenance
                        .record_fault(&displaced, FaultDisposition::Dropped, None);
                }
                self.activate(provider, table, entry, fault, FaultDisposition::Preempted)
            }
            FaultDecision::Activate { table, entry } => {
                self.activate(provider, table, entry, fault, FaultDisposition::Triggered)
            }
        }
    }

    /// Stop the context, retiring every child it attached
    pub fn stop(&mut self, provider: &mut dyn TaskProvider) -> Outcome {
        match self.status {
            ContextStatus::Running => self.halt(provider, "stopped by owner"),
            ContextStatus::Created => {
                self.status = ContextStatus::Stopped;
                Outcome::Stopped
            }
            _ => Outcome::Ignored,
        }
    }

    // ── Fault handling ───────────────────────────────────────────────

    fn activate(
        &mut self,
        provider: &mut dyn TaskProvider,
        table: usize,
        index: usize,
        fault: Fault,
        disposition: FaultDisposition,
    ) -> Outcome {
        let entry = match self.faults.entry(table, index) {
            Some(entry) => entry.clone(),
            None => return Outcome::FaultUnhandled,
        };
        self.faults.set_entry_state(table, index, EntryState::Triggered);
        tracing::info!(
            context = %self.id,
            entry = %entry.name,
            priority = entry.priority,
            fault = %fault,
            "Fault handler triggered"
        );
        self.core
            .provenance
            .record_fault(&fault, disposition, Some(&entry.name));

        if entry.replaces_suspended_task {
            let mut env = self.core.env(provider);
            self.model.retire_current(&mut env);
        }

        let scope = self
            .core
            .bindings
            .push_scope(entry.handler.name(), entry.handler.variables());
        let mut engine = ModelEngine::new(&entry.handler, Lane::Handler, scope);
        self.faults.set_entry_state(table, index, EntryState::Handling);

        let progress = {
            let mut env = self.core.env(provider);
            engine.start(&mut env).unwrap_or_else(Progress::Failed)
        };
        self.faults.set_active(ActiveHandler {
            table,
            entry: index,
            priority: entry.priority,
            fault,
            engine,
        });

        match self.settle_handler(provider, progress) {
            Outcome::Waiting | Outcome::Advanced if self.faults.is_handling() => {
                Outcome::HandlerStarted { entry: entry.name }
            }
            // The handler finished without waiting and the model resumed
            Outcome::Waiting | Outcome::Advanced => Outcome::FaultResolved { entry: entry.name },
            other => other,
        }
    }

    /// Stop the active handler without resolving or escalating its fault
    fn abandon_handler(&mut self, provider: &mut dyn TaskProvider) -> Option<Fault> {
        let mut active = self.faults.take_active()?;
        {
            let mut env = self.core.env(provider);
            active.engine.stop(&mut env);
        }
        self.core.bindings.pop_scope();
        self.faults
            .set_entry_state(active.table, active.entry, EntryState::Idle);
        Some(active.fault)
    }

    fn settle_handler(&mut self, provider: &mut dyn TaskProvider, progress: Progress) -> Outcome {
        match progress {
            Progress::Waiting => Outcome::Waiting,
            Progress::Advanced => Outcome::Advanced,
            Progress::Finished(completion) => self.resolve_handler(provider, completion),
            Progress::Failed(error) => self.escalate(provider, error),
        }
    }

    /// The handler succeeded: resume the normal model
    fn resolve_handler(&mut self, provider: &mut dyn TaskProvider, completion: Completion) -> Outcome {
        let active = match self.faults.take_active() {
            Some(active) => active,
            None => return Outcome::Waiting,
        };
        self.core.bindings.pop_scope();
        self.faults
            .set_entry_state(active.table, active.entry, EntryState::Resolved);
        self.faults
            .set_entry_state(active.table, active.entry, EntryState::Idle);

        let resumption = self
            .faults
            .entry(active.table, active.entry)
            .map(|e| e.resumption)
            .unwrap_or(Resumption::Continue);
        tracing::info!(
            context = %self.id,
            handler = %completion.model,
            resumption = ?resumption,
            "Fault resolved; resuming model"
        );
        self.core
            .provenance
            .record_fault(&active.fault, FaultDisposition::Resolved, Some(&completion.model));

        let progress = {
            let mut env = self.core.env(provider);
            match resumption {
                Resumption::Restart => self.model.restart(&mut env),
                Resumption::Continue => self.model.resume(&mut env),
            }
        };
        let outcome = self.settle_model(provider, progress);

        while self.is_running() && !self.faults.is_handling() {
            let next = match self.faults.next_pending() {
                Some(fault) => fault,
                None => break,
            };
            let handled = self.handle_fault(provider, next);
            if matches!(handled, Outcome::HandlerStarted { .. }) || handled.is_terminal() {
                return handled;
            }
        }
        outcome
    }

    /// The handler failed: hand the fault to the next enclosing table
    fn escalate(&mut self, provider: &mut dyn TaskProvider, error: CoordinationError) -> Outcome {
        let active = match self.faults.take_active() {
            Some(active) => active,
            None => return Outcome::Waiting,
        };
        self.core.bindings.pop_scope();
        self.faults
            .set_entry_state(active.table, active.entry, EntryState::Escalated);
        self.faults
            .set_entry_state(active.table, active.entry, EntryState::Idle);
        tracing::warn!(
            context = %self.id,
            fault = %active.fault,
            error = %error,
            "Fault handler failed; escalating"
        );
        self.core
            .provenance
            .record_fault(&active.fault, FaultDisposition::Escalated, None);

        let in_scope = self.core.scope_filter(&active.fault);
        match self
            .faults
            .escalation_target(&active.fault, active.table, &in_scope)
        {
            Some((table, entry)) => {
                self.activate(provider, table, entry, active.fault, FaultDisposition::Triggered)
            }
            None => {
                tracing::error!(context = %self.id, fault = %active.fault, "Fault escalation exhausted");
                self.core
                    .provenance
                    .record_fault(&active.fault, FaultDisposition::Exhausted, None);
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_fault_escalated(&active.fault);
                }
                self.conclude_failure(provider, CoordinationError::HandlerEscalationExhausted)
            }
        }
    }

    // ── Terminal outcomes ────────────────────────────────────────────

    fn settle_model(&mut self, provider: &mut dyn TaskProvider, progress: Progress) -> Outcome {
        match progress {
            Progress::Waiting => Outcome::Waiting,
            Progress::Advanced => Outcome::Advanced,
            Progress::Finished(completion) => self.conclude_success(provider, completion),
            Progress::Failed(error) => self.conclude_failure(provider, error),
        }
    }

    fn conclude_success(&mut self, provider: &mut dyn TaskProvider, completion: Completion) -> Outcome {
        self.retire_everything(provider);
        tracing::info!(
            context = %self.id,
            model = %completion.model,
            terminal = %completion.terminal,
            kind = ?completion.kind,
            "Coordination model completed"
        );
        match completion.kind {
            CompletionKind::Nominal => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_success(&completion);
                }
                self.status = ContextStatus::Succeeded(completion.clone());
                Outcome::Succeeded(completion)
            }
            CompletionKind::FailureRecovered => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_recovered(&completion);
                }
                self.status = ContextStatus::Recovered(completion.clone());
                Outcome::Recovered(completion)
            }
        }
    }

    fn conclude_failure(&mut self, provider: &mut dyn TaskProvider, error: CoordinationError) -> Outcome {
        self.retire_everything(provider);
        tracing::warn!(context = %self.id, error = %error, "Coordination model failed");
        if let Some(observer) = self.observer.as_mut() {
            observer.on_failure(&error);
        }
        self.status = ContextStatus::Failed(error.clone());
        Outcome::Failed(error)
    }

    fn halt(&mut self, provider: &mut dyn TaskProvider, reason: &str) -> Outcome {
        self.retire_everything(provider);
        self.core.provenance.record_stopped(reason);
        tracing::info!(context = %self.id, reason, "Coordination context stopped");
        self.status = ContextStatus::Stopped;
        Outcome::Stopped
    }

    /// Stop both engines and detach every child; nothing is left behind
    fn retire_everything(&mut self, provider: &mut dyn TaskProvider) {
        self.abandon_handler(provider);
        self.faults.clear_pending();
        let mut env = self.core.env(provider);
        self.model.stop(&mut env);
        for handle in env.resolver.retire_all(&mut *env.provider) {
            env.provenance.record_retired(&handle);
        }
        env.subscriptions.clear_all();
    }
}

impl std::fmt::Debug for CoordinationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationContext")
            .field("id", &self.id)
            .field("root", &self.core.root)
            .field("model", &self.model_def.name())
            .field("status", &self.status)
            .field("position", &self.model.position())
            .field("children", &self.core.resolver.live_count())
            .finish()
    }
}
