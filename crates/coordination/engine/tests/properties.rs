//! Property tests: three-valued logic, guard composition, child task
//! bookkeeping and resolution idempotence hold for random inputs.

use coordination_engine::{
    ActionInterface, BuilderRegistry, Bindings, CoordinationContext, Coordinator, EventLog,
    GuardEvaluator, GuardMemo, GuardScope, Lane, ResolveEnv, SimulatedPlan, SlotKey,
    SourceResolver,
};
use coordination_types::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arb_truth() -> impl Strategy<Value = Truth> {
    prop_oneof![Just(Truth::True), Just(Truth::False), Just(Truth::Pending)]
}

fn arb_event_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(EventName::START),
        Just(EventName::SUCCESS),
        Just(EventName::FAILED),
        Just("ping"),
    ]
}

fn arb_task_ref() -> impl Strategy<Value = TaskRef> {
    prop_oneof![Just(TaskRef::Current), Just(TaskRef::Root)]
}

/// Random guards over the current task and the root
fn arb_guard() -> impl Strategy<Value = EventGuard> {
    let leaf = prop_oneof![
        Just(EventGuard::Always),
        (arb_task_ref(), arb_event_name()).prop_map(|(task, event)| EventGuard::emitted(task, event)),
    ];
    leaf.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(EventGuard::All),
            prop::collection::vec(inner.clone(), 0..3).prop_map(EventGuard::Any),
            inner.prop_map(EventGuard::negate),
        ]
    })
}

/// Random events, each on the current task (`true`) or the root
fn arb_history() -> impl Strategy<Value = Vec<(bool, &'static str)>> {
    prop::collection::vec((any::<bool>(), arb_event_name()), 0..6)
}

fn log_of(history: &[(bool, &'static str)], current: &TaskId, root: &TaskId) -> EventLog {
    let mut log = EventLog::new();
    for (on_current, name) in history {
        let task = if *on_current { current } else { root };
        log.record(&TaskEvent::new(task.clone(), *name));
    }
    log
}

fn evaluate(guard: &EventGuard, scope: &GuardScope<'_>) -> Truth {
    GuardEvaluator::new().evaluate(guard, scope, &mut GuardMemo::new())
}

fn actions() -> Arc<ActionInterface> {
    let mut interface = ActionInterface::new();
    interface.register(ActionModel::new("work", "Work")).unwrap();
    Arc::new(interface)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Conjunction and disjunction are commutative and obey De Morgan.
    #[test]
    fn truth_follows_kleene_laws(a in arb_truth(), b in arb_truth()) {
        prop_assert_eq!(a.and(b), b.and(a));
        prop_assert_eq!(a.or(b), b.or(a));
        prop_assert_eq!(a.and(b).not(), a.not().or(b.not()));
        prop_assert_eq!(a.or(b).not(), a.not().and(b.not()));
        prop_assert_eq!(a.not().not(), a);
        prop_assert_eq!(a.and(Truth::True), a);
        prop_assert_eq!(a.or(Truth::False), a);
    }

    /// Composite guards evaluate to the composition of their parts.
    #[test]
    fn guard_composition_matches_truth_operators(
        left in arb_guard(),
        right in arb_guard(),
        history in arb_history(),
    ) {
        let root = TaskId::new("root");
        let current = TaskId::new("current");
        let log = log_of(&history, &current, &root);
        let variables = HashMap::new();
        let scope = GuardScope {
            log: &log,
            root: &root,
            current: Some(&current),
            since: 0,
            variables: &variables,
        };

        let l = evaluate(&left, &scope);
        let r = evaluate(&right, &scope);
        prop_assert_eq!(evaluate(&EventGuard::negate(left.clone()), &scope), l.not());
        prop_assert_eq!(evaluate(&EventGuard::all(vec![left.clone(), right.clone()]), &scope), l.and(r));
        prop_assert_eq!(evaluate(&EventGuard::any(vec![left, right]), &scope), l.or(r));
    }

    /// At most one instruction task is attached at any time, and nothing
    /// stays attached once the context is over.
    #[test]
    fn script_never_overlaps_or_orphans_tasks(
        steps in 1usize..5,
        results in prop::collection::vec(any::<bool>(), 0..8),
        stop_early in any::<bool>(),
    ) {
        let mut plan = SimulatedPlan::new();
        let root = plan.add_root("Mission");
        let script = (0..steps)
            .fold(Script::builder("random"), |builder, i| {
                builder.instruction(Instruction::run(format!("step-{}", i), TaskSource::action("work")))
            })
            .build()
            .unwrap();
        let mut coordinator = Coordinator::new(plan);
        let id = coordinator.add(CoordinationContext::new(root.clone(), script).with_actions(actions()));
        coordinator.start(&id).unwrap();
        coordinator.run_until_idle();

        for succeed in results {
            let task = match coordinator.context(&id).unwrap().current_task() {
                Some(task) => task.clone(),
                None => break,
            };
            if succeed {
                coordinator.provider_mut().succeed(&task);
            } else {
                coordinator.provider_mut().fail(&task);
            }
            coordinator.run_until_idle();
            prop_assert!(coordinator.provider().children_of(&root).len() <= 1);
            prop_assert!(coordinator.provider().running_children(&root) <= 1);
        }

        if stop_early {
            coordinator.stop(&id);
        } else {
            while let Some(task) = coordinator.context(&id).unwrap().current_task().cloned() {
                coordinator.provider_mut().succeed(&task);
                coordinator.run_until_idle();
            }
        }

        prop_assert!(coordinator.context(&id).unwrap().status().is_terminal());
        prop_assert!(coordinator.provider().children_of(&root).is_empty());
        prop_assert_eq!(coordinator.provider().subscription_count(), 0);
        for task in coordinator.provider().instantiations() {
            prop_assert!(coordinator.provider().state_of(&task.id).is_terminal());
        }
    }

    /// Resolving a slot again returns the task it already holds.
    #[test]
    fn resolution_is_idempotent_per_slot(repeats in 1usize..6, activation in 1u64..50) {
        let mut plan = SimulatedPlan::new();
        let root = plan.add_root("Mission");
        let mut bindings = Bindings::new();
        let interface = actions();
        let builders = BuilderRegistry::new();
        let mut resolver = SourceResolver::new(root.clone(), "coord");
        let key = SlotKey::new(Lane::Model, "work", activation);
        let source = TaskSource::action("work");

        let mut handles = Vec::new();
        for _ in 0..repeats {
            let mut env = ResolveEnv {
                provider: &mut plan,
                bindings: &mut bindings,
                actions: &interface,
                builders: &builders,
            };
            handles.push(resolver.resolve(&mut env, key.clone(), &source).unwrap());
        }

        prop_assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
        prop_assert_eq!(plan.instantiations().len(), 1);
        prop_assert_eq!(resolver.resolutions(), 1);
        let attached = plan.children_of(&root);
        prop_assert_eq!(attached.len(), 1);
        let expected_role = format!("coord/model/work#{}", activation);
        prop_assert_eq!(attached[0].1.as_str(), expected_role.as_str());
    }
}
