//! Coordinator: the serialized delivery loop over many contexts
//!
//! Every start, event and fault passes through one queue and is handled
//! to completion before the next one is taken, so no context ever sees
//! two signals at once. Signals the provider produces while a signal is
//! being handled (start events, forwarded events) are queued behind it.

use crate::{CoordinationContext, CoordinatorConfig, Outcome, SubscriptionChange};
use coordination_types::{
    ContextId, CoordinationError, CoordinationResult, EventName, EventSource, Signal, TaskId,
    TaskProvider,
};
use std::collections::{BTreeMap, VecDeque};

/// What one [`Coordinator::run_until_idle`] call did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunReport {
    /// Signals taken off the queue
    pub signals: usize,
    /// Context deliveries, one signal may reach several contexts
    pub deliveries: usize,
    /// Every outcome other than [`Outcome::Ignored`], in delivery order
    pub outcomes: Vec<(ContextId, Outcome)>,
    /// The delivery cap was hit with signals still queued
    pub truncated: bool,
}

impl RunReport {
    /// Outcomes reported by one context
    pub fn outcomes_for(&self, id: &ContextId) -> Vec<&Outcome> {
        self.outcomes
            .iter()
            .filter(|(context, _)| context == id)
            .map(|(_, outcome)| outcome)
            .collect()
    }
}

/// Owns the provider and the contexts, and feeds signals to them
pub struct Coordinator<P> {
    provider: P,
    contexts: BTreeMap<ContextId, CoordinationContext>,
    queue: VecDeque<Signal>,
    /// How many contexts want each (task, event) pair
    interest: BTreeMap<(TaskId, EventName), usize>,
    config: CoordinatorConfig,
}

impl<P> Coordinator<P>
where
    P: TaskProvider + EventSource,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            contexts: BTreeMap::new(),
            queue: VecDeque::new(),
            interest: BTreeMap::new(),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    // ── Contexts ─────────────────────────────────────────────────────

    /// Take ownership of a context without starting it
    pub fn add(&mut self, context: CoordinationContext) -> ContextId {
        let id = context.id().clone();
        tracing::info!(context = %id, model = %context.model_name(), "Context added");
        self.contexts.insert(id.clone(), context);
        id
    }

    pub fn context(&self, id: &ContextId) -> Option<&CoordinationContext> {
        self.contexts.get(id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &CoordinationContext> {
        self.contexts.values()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn start(&mut self, id: &ContextId) -> CoordinationResult<Outcome> {
        let context = self
            .contexts
            .get_mut(id)
            .ok_or_else(|| CoordinationError::UnknownContext(id.clone()))?;
        let outcome = context.start(&mut self.provider);
        self.sync(id);
        outcome
    }

    /// Stop a context; `None` if it is unknown
    pub fn stop(&mut self, id: &ContextId) -> Option<Outcome> {
        let outcome = self.contexts.get_mut(id)?.stop(&mut self.provider);
        self.sync(id);
        Some(outcome)
    }

    /// Remove and return every context that reached a terminal status
    pub fn reap(&mut self) -> Vec<CoordinationContext> {
        let done: Vec<ContextId> = self
            .contexts
            .iter()
            .filter(|(_, context)| context.status().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        done.iter()
            .filter_map(|id| self.contexts.remove(id))
            .collect()
    }

    // ── Delivery ─────────────────────────────────────────────────────

    /// Queue a signal from outside the provider
    pub fn post(&mut self, signal: impl Into<Signal>) {
        self.queue.push_back(signal.into());
    }

    /// Move everything the provider observed onto the queue
    pub fn pump(&mut self) -> usize {
        let signals = self.provider.poll();
        let count = signals.len();
        self.queue.extend(signals);
        count
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Deliver queued signals, one at a time, until none are left or the
    /// delivery cap is reached
    pub fn run_until_idle(&mut self) -> RunReport {
        let mut report = RunReport::default();
        self.pump();

        while let Some(signal) = self.queue.pop_front() {
            if report.deliveries >= self.config.max_deliveries_per_run {
                self.queue.push_front(signal);
                report.truncated = true;
                tracing::warn!(
                    cap = self.config.max_deliveries_per_run,
                    queued = self.queue.len(),
                    "Delivery cap reached; leaving signals queued"
                );
                break;
            }
            report.signals += 1;

            let targets: Vec<ContextId> = self
                .contexts
                .iter()
                .filter(|(_, context)| context.wants(&signal))
                .map(|(id, _)| id.clone())
                .collect();
            if targets.is_empty() {
                tracing::trace!(task = %signal.task(), "Signal wanted by no context");
            }

            for id in targets {
                let Some(context) = self.contexts.get_mut(&id) else {
                    continue;
                };
                let outcome = context.deliver(&mut self.provider, &signal);
                report.deliveries += 1;
                tracing::debug!(context = %id, task = %signal.task(), outcome = ?outcome, "Signal delivered");
                self.sync(&id);
                if outcome != Outcome::Ignored {
                    report.outcomes.push((id, outcome));
                }
            }
            self.pump();
        }
        report
    }

    /// Forward a context's subscription changes, counting interest so a
    /// pair shared by two contexts stays subscribed until both drop it
    fn sync(&mut self, id: &ContextId) {
        let changes = match self.contexts.get_mut(id) {
            Some(context) => context.take_subscription_changes(),
            None => return,
        };
        for change in changes {
            match change {
                SubscriptionChange::Subscribe(task, event) => {
                    let count = self.interest.entry((task.clone(), event.clone())).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        self.provider.subscribe(&task, &event);
                    }
                }
                SubscriptionChange::Unsubscribe(task, event) => {
                    let key = (task, event);
                    let remaining = match self.interest.get_mut(&key) {
                        Some(count) => {
                            *count = count.saturating_sub(1);
                            *count
                        }
                        None => continue,
                    };
                    if remaining == 0 {
                        self.interest.remove(&key);
                        self.provider.unsubscribe(&key.0, &key.1);
                    }
                }
            }
        }
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Coordinator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("provider", &self.provider)
            .field("contexts", &self.contexts.len())
            .field("queued", &self.queue.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionInterface, ContextStatus, SimulatedPlan};
    use coordination_types::{ActionModel, Instruction, Script, TaskSource};
    use std::sync::Arc;

    fn actions() -> Arc<ActionInterface> {
        let mut interface = ActionInterface::new();
        interface.register(ActionModel::new("a", "A")).unwrap();
        interface.register(ActionModel::new("b", "B")).unwrap();
        Arc::new(interface)
    }

    fn two_steps(plan: &mut SimulatedPlan) -> CoordinationContext {
        let root = plan.add_root("Mission");
        let script = Script::builder("pair")
            .instruction(Instruction::run("first", TaskSource::action("a")))
            .instruction(Instruction::run("second", TaskSource::action("b")))
            .build()
            .unwrap();
        CoordinationContext::new(root, script).with_actions(actions())
    }

    #[test]
    fn test_runs_script_through_the_queue() {
        let mut plan = SimulatedPlan::new();
        let context = two_steps(&mut plan);
        let mut coordinator = Coordinator::new(plan);
        let id = coordinator.add(context);

        coordinator.start(&id).unwrap();
        coordinator.run_until_idle();
        let first = coordinator.context(&id).unwrap().current_task().unwrap().clone();
        assert!(coordinator
            .provider()
            .is_subscribed(&first.id, &EventName::success()));

        coordinator.provider_mut().succeed(&first);
        coordinator.run_until_idle();
        let second = coordinator.context(&id).unwrap().current_task().unwrap().clone();
        assert_eq!(second.model, "B");

        coordinator.provider_mut().succeed(&second);
        let report = coordinator.run_until_idle();
        assert!(matches!(
            report.outcomes_for(&id).last(),
            Some(Outcome::Succeeded(_))
        ));
        assert_eq!(coordinator.provider().subscription_count(), 0);

        let reaped = coordinator.reap();
        assert_eq!(reaped.len(), 1);
        assert!(matches!(reaped[0].status(), ContextStatus::Succeeded(_)));
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_delivery_cap_leaves_signals_queued() {
        let mut plan = SimulatedPlan::new();
        let context = two_steps(&mut plan);
        let mut coordinator = Coordinator::new(plan).with_config(CoordinatorConfig {
            max_deliveries_per_run: 1,
        });
        let id = coordinator.add(context);
        coordinator.start(&id).unwrap();
        let root = coordinator.context(&id).unwrap().root().clone();
        coordinator.provider_mut().emit_event(&root, "ping");
        coordinator.provider_mut().emit_event(&root, "ping");

        let report = coordinator.run_until_idle();
        assert!(report.truncated);
        assert_eq!(report.deliveries, 1);
        assert!(coordinator.queued() > 0);
    }

    #[test]
    fn test_unknown_context() {
        let mut coordinator = Coordinator::new(SimulatedPlan::new());
        let missing = ContextId::new("missing");
        assert_eq!(
            coordinator.start(&missing),
            Err(CoordinationError::UnknownContext(missing.clone()))
        );
        assert!(coordinator.stop(&missing).is_none());
    }

    #[test]
    fn test_stop_unsubscribes_everything() {
        let mut plan = SimulatedPlan::new();
        let context = two_steps(&mut plan);
        let mut coordinator = Coordinator::new(plan);
        let id = coordinator.add(context);
        coordinator.start(&id).unwrap();
        assert!(coordinator.provider().subscription_count() > 0);

        assert_eq!(coordinator.stop(&id), Some(Outcome::Stopped));
        assert_eq!(coordinator.provider().subscription_count(), 0);
        let root = coordinator.context(&id).unwrap().root().clone();
        assert!(coordinator.provider().children_of(&root).is_empty());
    }
}
