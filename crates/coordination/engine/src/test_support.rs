//! Fixture for driving a single engine against a simulated plan

use crate::{
    ActionInterface, Bindings, BuilderRegistry, EventLog, ProvenanceTracker, SimulatedPlan,
    SourceResolver, StepEnv, Subscriptions,
};
use coordination_types::{ActionModel, ContextId, TaskEvent, TaskHandle, Value};

pub(crate) struct Harness {
    pub plan: SimulatedPlan,
    pub root: TaskHandle,
    pub resolver: SourceResolver,
    pub bindings: Bindings,
    pub actions: ActionInterface,
    pub builders: BuilderRegistry,
    pub log: EventLog,
    pub subscriptions: Subscriptions,
    pub provenance: ProvenanceTracker,
}

impl Harness {
    /// A root task plus one argument-less action per `(name, model)` pair
    pub fn new(actions: &[(&str, &str)]) -> Self {
        let mut plan = SimulatedPlan::new();
        let root = plan.add_root("Mission");
        let mut interface = ActionInterface::new();
        for (name, model) in actions {
            interface
                .register(ActionModel::new(*name, *model))
                .expect("duplicate action in fixture");
        }
        Self {
            resolver: SourceResolver::new(root.clone(), "coordination"),
            plan,
            root,
            bindings: Bindings::new(),
            actions: interface,
            builders: BuilderRegistry::new(),
            log: EventLog::new(),
            subscriptions: Subscriptions::new(),
            provenance: ProvenanceTracker::new(ContextId::new("test")),
        }
    }

    pub fn env(&mut self) -> StepEnv<'_> {
        StepEnv {
            provider: &mut self.plan,
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

    /// Observe an event: update the plan, then log it
    pub fn emit(&mut self, task: &TaskHandle, name: &str) -> TaskEvent {
        self.observe(TaskEvent::new(task.id.clone(), name))
    }

    pub fn emit_with(&mut self, task: &TaskHandle, name: &str, payload: Value) -> TaskEvent {
        self.observe(TaskEvent::new(task.id.clone(), name).with_payload(payload))
    }

    fn observe(&mut self, event: TaskEvent) -> TaskEvent {
        self.plan.record(&event);
        self.log.record(&event);
        event
    }
}
