//! Source resolver: turns task sources into live children of the root
//!
//! Every resolved task is attached to the root under a role that is
//! unique for its slot, so children never collide. A slot is one step of
//! one activation; resolving the same slot twice returns the same task.

use crate::{ActionInterface, Bindings, BuilderRegistry, Lane, ResolutionEnv};
use coordination_types::{
    ArgBinding, Arguments, CoordinationError, CoordinationResult, Role, TaskHandle, TaskId,
    TaskProvider, TaskSource,
};
use std::collections::BTreeMap;

/// Identifies one step of one activation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub lane: Lane,
    pub step: String,
    pub activation: u64,
}

impl SlotKey {
    pub fn new(lane: Lane, step: impl Into<String>, activation: u64) -> Self {
        Self {
            lane,
            step: step.into(),
            activation,
        }
    }
}

/// What resolution may touch
pub struct ResolveEnv<'a> {
    pub provider: &'a mut dyn TaskProvider,
    pub bindings: &'a mut Bindings,
    pub actions: &'a ActionInterface,
    pub builders: &'a BuilderRegistry,
}

#[derive(Clone, Debug)]
struct LiveChild {
    key: SlotKey,
    handle: TaskHandle,
    role: Role,
}

/// Resolves task sources and tracks the children it attached
#[derive(Clone, Debug)]
pub struct SourceResolver {
    root: TaskHandle,
    role_prefix: String,
    live: Vec<LiveChild>,
    resolutions: u64,
}

impl SourceResolver {
    pub fn new(root: TaskHandle, role_prefix: impl Into<String>) -> Self {
        Self {
            root,
            role_prefix: role_prefix.into(),
            live: Vec::new(),
            resolutions: 0,
        }
    }

    // ── Resolution ───────────────────────────────────────────────────

    /// Resolve a source for a slot, attaching the task as a child.
    ///
    /// Idempotent per slot: a slot that already holds a live child gets
    /// that child back without touching the provider.
    pub fn resolve(
        &mut self,
        env: &mut ResolveEnv<'_>,
        key: SlotKey,
        source: &TaskSource,
    ) -> CoordinationResult<TaskHandle> {
        if let Some(child) = self.live.iter().find(|c| c.key == key) {
            return Ok(child.handle.clone());
        }

        let handle = self.produce(env, source)?;
        let role = Role::new(format!(
            "{}/{}/{}#{}",
            self.role_prefix, key.lane, key.step, key.activation
        ));
        env.provider.attach_child(&self.root, &handle, &role)?;
        self.resolutions += 1;

        tracing::debug!(
            task = %handle,
            role = %role,
            source = %source.label(),
            "Task source resolved"
        );
        self.live.push(LiveChild {
            key,
            handle: handle.clone(),
            role,
        });
        Ok(handle)
    }

    fn produce(&self, env: &mut ResolveEnv<'_>, source: &TaskSource) -> CoordinationResult<TaskHandle> {
        match source {
            TaskSource::FromAction { action, arguments } => {
                let model = env.actions.get(action).ok_or_else(|| {
                    CoordinationError::UnresolvableSource(format!("no action named '{}'", action))
                })?;
                let bound = self.bind_arguments(env, arguments)?;
                let description = model.bind(bound)?;
                env.provider
                    .instantiate(&description)
                    .map_err(|e| CoordinationError::UnresolvableSource(format!("action '{}': {}", action, e)))
            }
            TaskSource::FromInstantiationObject { builder, arguments } => {
                let registered = env.builders.get(builder).cloned().ok_or_else(|| {
                    CoordinationError::UnresolvableSource(format!("no builder named '{}'", builder))
                })?;
                let bound = self.bind_arguments(env, arguments)?;
                registered
                    .build(&mut *env.provider, &bound)
                    .map_err(|e| CoordinationError::UnresolvableSource(format!("builder '{}': {}", builder, e)))
            }
            TaskSource::FromVariable(name) => {
                let value = env.bindings.get(
                    name,
                    &ResolutionEnv {
                        provider: &*env.provider,
                        root: &self.root,
                    },
                )?;
                value
                    .as_task()
                    .cloned()
                    .ok_or_else(|| CoordinationError::NotATask(name.clone()))
            }
            TaskSource::FromAsPlan(object) => env
                .provider
                .instantiate(&object.as_plan())
                .map_err(|e| CoordinationError::UnresolvableSource(format!("plan '{}': {}", object.name(), e))),
        }
    }

    fn bind_arguments(
        &self,
        env: &mut ResolveEnv<'_>,
        arguments: &BTreeMap<String, ArgBinding>,
    ) -> CoordinationResult<Arguments> {
        let mut bound = Arguments::new();
        for (name, binding) in arguments {
            let value = match binding {
                ArgBinding::Value(value) => value.clone(),
                ArgBinding::Variable(variable) => env.bindings.get(
                    variable,
                    &ResolutionEnv {
                        provider: &*env.provider,
                        root: &self.root,
                    },
                )?,
            };
            bound.insert(name.clone(), value);
        }
        Ok(bound)
    }

    // ── Retirement ───────────────────────────────────────────────────

    /// Stop and detach the child held by a slot.
    ///
    /// Provider errors are logged, not returned: retirement always
    /// forgets the child so nothing is left attached by the context. A
    /// task another live slot still holds is only detached from this
    /// slot's role, never stopped.
    pub fn retire(&mut self, provider: &mut dyn TaskProvider, key: &SlotKey) -> Option<TaskHandle> {
        let index = self.live.iter().position(|c| &c.key == key)?;
        let child = self.live.remove(index);
        self.release(provider, &child);
        Some(child.handle)
    }

    /// Retire every child of a lane, newest first
    pub fn retire_lane(&mut self, provider: &mut dyn TaskProvider, lane: Lane) -> Vec<TaskHandle> {
        let mut retired = Vec::new();
        while let Some(index) = self.live.iter().rposition(|c| c.key.lane == lane) {
            let child = self.live.remove(index);
            self.release(provider, &child);
            retired.push(child.handle);
        }
        retired
    }

    /// Retire every child of the context
    pub fn retire_all(&mut self, provider: &mut dyn TaskProvider) -> Vec<TaskHandle> {
        let mut retired = self.retire_lane(provider, Lane::Handler);
        retired.extend(self.retire_lane(provider, Lane::Model));
        retired
    }

    fn release(&self, provider: &mut dyn TaskProvider, child: &LiveChild) {
        let shared = self.is_child(&child.handle.id);
        if !shared && !provider.state(&child.handle).is_terminal() {
            if let Err(e) = provider.stop(&child.handle) {
                tracing::warn!(task = %child.handle, error = %e, "Failed to stop retired task");
            }
        }
        if let Err(e) = provider.detach_child(&self.root, &child.handle, &child.role) {
            tracing::warn!(task = %child.handle, role = %child.role, error = %e, "Failed to detach retired task");
        }
        tracing::debug!(task = %child.handle, role = %child.role, shared, "Task retired");
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn root(&self) -> &TaskHandle {
        &self.root
    }

    pub fn handle(&self, key: &SlotKey) -> Option<&TaskHandle> {
        self.live.iter().find(|c| &c.key == key).map(|c| &c.handle)
    }

    pub fn role(&self, key: &SlotKey) -> Option<&Role> {
        self.live.iter().find(|c| &c.key == key).map(|c| &c.role)
    }

    pub fn is_child(&self, task: &TaskId) -> bool {
        self.live.iter().any(|c| &c.handle.id == task)
    }

    pub fn children(&self) -> impl Iterator<Item = &TaskHandle> {
        self.live.iter().map(|c| &c.handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_in(&self, lane: Lane) -> usize {
        self.live.iter().filter(|c| c.key.lane == lane).count()
    }

    /// Number of successful resolutions over the resolver's lifetime
    pub fn resolutions(&self) -> u64 {
        self.resolutions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedPlan;
    use coordination_types::{ActionModel, ArgumentSpec, TaskDescription, Value, VariableDecl};

    struct Fixture {
        plan: SimulatedPlan,
        root: TaskHandle,
        bindings: Bindings,
        actions: ActionInterface,
        builders: BuilderRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let mut plan = SimulatedPlan::new();
            let root = plan.add_root("Mission");
            let mut actions = ActionInterface::new();
            actions
                .register(
                    ActionModel::new("goto", "Goto").with_argument(ArgumentSpec::required("x")),
                )
                .unwrap();
            Self {
                plan,
                root,
                bindings: Bindings::new(),
                actions,
                builders: BuilderRegistry::new(),
            }
        }

        fn resolve(
            &mut self,
            resolver: &mut SourceResolver,
            key: SlotKey,
            source: &TaskSource,
        ) -> CoordinationResult<TaskHandle> {
            let mut env = ResolveEnv {
                provider: &mut self.plan,
                bindings: &mut self.bindings,
                actions: &self.actions,
                builders: &self.builders,
            };
            resolver.resolve(&mut env, key, source)
        }
    }

    #[test]
    fn test_resolution_is_idempotent_per_slot() {
        let mut fx = Fixture::new();
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let source = TaskSource::action("goto").with_argument("x", 3i64);

        let key = SlotKey::new(Lane::Model, "go", 1);
        let first = fx.resolve(&mut resolver, key.clone(), &source).unwrap();
        let again = fx.resolve(&mut resolver, key, &source).unwrap();
        assert_eq!(first, again);
        assert_eq!(fx.plan.instantiations().len(), 1);

        let next = fx
            .resolve(&mut resolver, SlotKey::new(Lane::Model, "go", 2), &source)
            .unwrap();
        assert_ne!(first, next);
        assert_eq!(resolver.resolutions(), 2);
        assert_eq!(fx.plan.children_of(&fx.root).len(), 2);
    }

    #[test]
    fn test_roles_are_unique() {
        let mut fx = Fixture::new();
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let source = TaskSource::action("goto").with_argument("x", 1i64);
        let a = SlotKey::new(Lane::Model, "go", 1);
        let b = SlotKey::new(Lane::Handler, "go", 1);
        fx.resolve(&mut resolver, a.clone(), &source).unwrap();
        fx.resolve(&mut resolver, b.clone(), &source).unwrap();
        assert_eq!(resolver.role(&a).unwrap().as_str(), "coordination/model/go#1");
        assert_eq!(resolver.role(&b).unwrap().as_str(), "coordination/handler/go#1");
    }

    #[test]
    fn test_unresolvable_sources() {
        let mut fx = Fixture::new();
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let key = SlotKey::new(Lane::Model, "s", 1);

        let missing = fx.resolve(&mut resolver, key.clone(), &TaskSource::action("fly"));
        assert!(matches!(missing, Err(CoordinationError::UnresolvableSource(_))));

        let unbound_arg = fx.resolve(&mut resolver, key.clone(), &TaskSource::action("goto"));
        assert!(matches!(unbound_arg, Err(CoordinationError::UnresolvableSource(_))));

        let no_builder = fx.resolve(&mut resolver, key.clone(), &TaskSource::builder("survey"));
        assert!(matches!(no_builder, Err(CoordinationError::UnresolvableSource(_))));

        fx.bindings
            .push_scope("m", &[VariableDecl::constant("n", 4i64)]);
        let not_task = fx.resolve(&mut resolver, key, &TaskSource::variable("n"));
        assert!(matches!(not_task, Err(CoordinationError::NotATask(_))));
        assert_eq!(resolver.live_count(), 0);
    }

    #[test]
    fn test_variable_argument_binding() {
        let mut fx = Fixture::new();
        fx.bindings
            .push_scope("m", &[VariableDecl::constant("target", 9i64)]);
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let source = TaskSource::action("goto").with_variable_argument("x", "target");
        let handle = fx
            .resolve(&mut resolver, SlotKey::new(Lane::Model, "go", 1), &source)
            .unwrap();
        assert_eq!(fx.plan.argument(&handle, "x"), Some(Value::Int(9)));

        let unbound = TaskSource::action("goto").with_variable_argument("x", "nowhere");
        assert!(matches!(
            fx.resolve(&mut resolver, SlotKey::new(Lane::Model, "go", 2), &unbound),
            Err(CoordinationError::UnboundVariable(_))
        ));
    }

    #[test]
    fn test_builder_and_variable_sources() {
        let mut fx = Fixture::new();
        fx.builders.register(
            "survey",
            |provider: &mut dyn TaskProvider, args: &Arguments| {
                let mut description = TaskDescription::new("Survey");
                description.arguments = args.clone();
                provider.instantiate(&description)
            },
        );
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let built = fx
            .resolve(
                &mut resolver,
                SlotKey::new(Lane::Model, "survey", 1),
                &TaskSource::builder("survey").with_argument("area", "north"),
            )
            .unwrap();
        assert_eq!(built.model, "Survey");

        fx.bindings.push_scope("m", &[]);
        fx.bindings.set("held", Value::Task(built.clone())).unwrap();
        let reused = fx
            .resolve(&mut resolver, SlotKey::new(Lane::Model, "reuse", 1), &TaskSource::variable("held"))
            .unwrap();
        assert_eq!(reused, built);
    }

    #[test]
    fn test_retire_stops_and_detaches() {
        let mut fx = Fixture::new();
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let source = TaskSource::action("goto").with_argument("x", 1i64);
        let a = SlotKey::new(Lane::Model, "a", 1);
        let handle = fx.resolve(&mut resolver, a.clone(), &source).unwrap();
        fx.resolve(&mut resolver, SlotKey::new(Lane::Handler, "h", 1), &source)
            .unwrap();

        assert_eq!(resolver.retire(&mut fx.plan, &a), Some(handle.clone()));
        assert!(fx.plan.was_stopped(&handle.id));
        assert!(!resolver.is_child(&handle.id));
        assert_eq!(resolver.live_in(Lane::Handler), 1);

        resolver.retire_all(&mut fx.plan);
        assert_eq!(resolver.live_count(), 0);
        assert!(fx.plan.children_of(&fx.root).is_empty());
    }

    #[test]
    fn test_retiring_a_shared_task_leaves_it_running() {
        let mut fx = Fixture::new();
        let mut resolver = SourceResolver::new(fx.root.clone(), "coordination");
        let model = SlotKey::new(Lane::Model, "walk", 1);
        let walk = fx
            .resolve(&mut resolver, model.clone(), &TaskSource::action("goto").with_argument("x", 2i64))
            .unwrap();

        fx.bindings.push_scope("handler", &[]);
        fx.bindings.set("held", Value::Task(walk.clone())).unwrap();
        let borrowed = SlotKey::new(Lane::Handler, "watch", 1);
        let watched = fx
            .resolve(&mut resolver, borrowed.clone(), &TaskSource::variable("held"))
            .unwrap();
        assert_eq!(watched, walk);
        assert_eq!(fx.plan.children_of(&fx.root).len(), 2);

        resolver.retire(&mut fx.plan, &borrowed);
        assert!(!fx.plan.was_stopped(&walk.id));
        assert!(resolver.is_child(&walk.id));
        assert_eq!(fx.plan.children_of(&fx.root).len(), 1);

        resolver.retire(&mut fx.plan, &model);
        assert!(fx.plan.was_stopped(&walk.id));
        assert!(fx.plan.children_of(&fx.root).is_empty());
    }
}
