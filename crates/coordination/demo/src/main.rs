#![deny(unsafe_code)]
//! Coordination runtime demo.
//!
//! Runs three scenarios against the simulated plan:
//! 1. A three-instruction script run to completion
//! 2. A state machine that recovers from a failed task
//! 3. A low-priority fault handler preempted by a higher-priority one
//!
//! Set `RUST_LOG=debug` to watch the runtime's own logging.

use anyhow::{anyhow, Context};
use coordination_engine::{
    ActionInterface, ContextStatus, CoordinationContext, Coordinator, FaultDisposition,
    FaultResponseTable, Outcome, SharedObserver, SimulatedPlan,
};
use coordination_types::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── Formatting Helpers ──────────────────────────────────────────────────

const BANNER: &str = r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║              Coordination Runtime  --  Demo                  ║
 ║                                                              ║
 ║   Scripts, state machines and prioritized fault handlers     ║
 ║   driving tasks owned by a simulated plan.                   ║
 ╚══════════════════════════════════════════════════════════════╝
"#;

fn section(title: &str) {
    let width: usize = 60;
    let pad = width.saturating_sub(title.len() + 4);
    let left = pad / 2;
    let right = pad - left;
    println!();
    println!(" ┌{}┐", "─".repeat(width));
    println!(" │{}  {}  {}│", " ".repeat(left), title, " ".repeat(right));
    println!(" └{}┘", "─".repeat(width));
}

fn ok(msg: &str) {
    println!("   [OK]  {}", msg);
}

fn info(msg: &str) {
    println!("   [--]  {}", msg);
}

fn warn(msg: &str) {
    println!("   [!!]  {}", msg);
}

// ── Main ────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    println!("{}", BANNER);

    if let Err(e) = run_demo() {
        eprintln!();
        eprintln!("   [FATAL]  Demo failed: {:#}", e);
        std::process::exit(1);
    }

    println!();
    println!(" ════════════════════════════════════════════════════════════════");
    println!("  Demo complete.  All scenarios finished as expected.");
    println!(" ════════════════════════════════════════════════════════════════");
    println!();
}

fn run_demo() -> anyhow::Result<()> {
    tracing::info!("Running coordination scenarios");
    section("Scenario A: Sequential Script");
    scenario_script()?;

    section("Scenario B: Failure Recovery");
    scenario_recovery()?;

    section("Scenario C: Fault Preemption");
    scenario_preemption()?;

    Ok(())
}

// ── Shared helpers ──────────────────────────────────────────────────────

fn actions(pairs: &[(&str, &str)]) -> anyhow::Result<Arc<ActionInterface>> {
    let mut interface = ActionInterface::new();
    for (name, model) in pairs {
        interface.register(ActionModel::new(*name, *model))?;
    }
    Ok(Arc::new(interface))
}

fn current_task(coordinator: &Coordinator<SimulatedPlan>, id: &ContextId) -> anyhow::Result<TaskHandle> {
    coordinator
        .context(id)
        .and_then(|c| c.current_task())
        .cloned()
        .ok_or_else(|| anyhow!("context {} has no active task", id))
}

fn handler_task(coordinator: &Coordinator<SimulatedPlan>, id: &ContextId) -> anyhow::Result<TaskHandle> {
    coordinator
        .context(id)
        .and_then(|c| c.handler_task())
        .cloned()
        .ok_or_else(|| anyhow!("context {} has no active handler task", id))
}

fn status(coordinator: &Coordinator<SimulatedPlan>, id: &ContextId) -> anyhow::Result<ContextStatus> {
    coordinator
        .context(id)
        .map(|c| c.status().clone())
        .ok_or_else(|| anyhow!("unknown context {}", id))
}

/// Deliver everything queued and print what each delivery led to
fn settle(coordinator: &mut Coordinator<SimulatedPlan>, id: &ContextId) -> Vec<Outcome> {
    let report = coordinator.run_until_idle();
    let outcomes: Vec<Outcome> = report.outcomes_for(id).into_iter().cloned().collect();
    for outcome in &outcomes {
        info(&format!("outcome: {:?}", outcome));
    }
    outcomes
}

// ── Scenario A ──────────────────────────────────────────────────────────

fn scenario_script() -> anyhow::Result<()> {
    let mut plan = SimulatedPlan::new();
    let root = plan.add_root("Mission");
    let script = Script::builder("survey-route")
        .instruction(Instruction::run("a", TaskSource::action("a")))
        .instruction(Instruction::run("b", TaskSource::action("b")))
        .instruction(Instruction::run("c", TaskSource::action("c")))
        .build()?;

    let observer = SharedObserver::new();
    let context = CoordinationContext::new(root, script)
        .with_actions(actions(&[("a", "A"), ("b", "B"), ("c", "C")])?)
        .with_observer(observer.clone());
    let mut coordinator = Coordinator::new(plan);
    let id = coordinator.add(context);
    coordinator.start(&id)?;
    settle(&mut coordinator, &id);

    while status(&coordinator, &id)?.is_running() {
        let task = current_task(&coordinator, &id)?;
        ok(&format!("running {}", task));
        coordinator.provider_mut().succeed(&task);
        settle(&mut coordinator, &id);
    }

    let models: Vec<&str> = coordinator
        .provider()
        .instantiations()
        .iter()
        .map(|h| h.model.as_str())
        .collect();
    info(&format!("instantiated in order: {}", models.join(", ")));

    let seen = observer.snapshot();
    let completion = seen
        .successes
        .first()
        .context("script did not report success")?;
    ok(&format!("finished at {} after {} steps", completion.terminal, completion.steps_taken()));
    println!("{}", serde_json::to_string_pretty(completion)?);
    Ok(())
}

// ── Scenario B ──────────────────────────────────────────────────────────

fn scenario_recovery() -> anyhow::Result<()> {
    let mut plan = SimulatedPlan::new();
    let root = plan.add_root("Mission");
    let machine = StateMachineModel::builder("fallback")
        .initial(
            State::new("s1", TaskSource::action("work")).transition(EventGuard::on_failure(), "s2"),
        )
        .state(State::final_marker("s2"))
        .build()?;

    let observer = SharedObserver::new();
    let context = CoordinationContext::new(root, machine)
        .with_actions(actions(&[("work", "Work")])?)
        .with_observer(observer.clone());
    let mut coordinator = Coordinator::new(plan);
    let id = coordinator.add(context);
    coordinator.start(&id)?;
    settle(&mut coordinator, &id);

    let task = current_task(&coordinator, &id)?;
    warn(&format!("{} fails", task));
    coordinator.provider_mut().fail(&task);
    settle(&mut coordinator, &id);

    let seen = observer.snapshot();
    info(&format!(
        "callbacks: success={} recovered={} failure={}",
        seen.successes.len(),
        seen.recoveries.len(),
        seen.failures.len()
    ));
    let completion = seen
        .recoveries
        .first()
        .context("state machine did not report recovery")?;
    ok(&format!("reached {} ({:?})", completion.terminal, completion.kind));
    info(&format!(
        "tasks instantiated: {}",
        coordinator.provider().instantiations().len()
    ));
    Ok(())
}

// ── Scenario C ──────────────────────────────────────────────────────────

fn scenario_preemption() -> anyhow::Result<()> {
    let mut plan = SimulatedPlan::new();
    let root = plan.add_root("Rover");

    let patrol = Script::builder("patrol")
        .instruction(Instruction::run("patrol", TaskSource::action("patrol")))
        .build()?;
    let slow_down = Script::builder("slow-down")
        .instruction(
            Instruction::run("brake", TaskSource::action("brake"))
                .then_assign(Assignment::constant("reason", "obstacle close")),
        )
        .instruction(Instruction::run("creep", TaskSource::action("creep")))
        .build()?;
    let emergency = Script::builder("emergency-stop")
        .instruction(Instruction::run(
            "halt",
            TaskSource::action("halt").with_variable_argument("reason", "reason"),
        ))
        .build()?;
    let table = FaultResponseTable::new("rover")
        .with_entry(FaultResponseEntry::new(
            "slow-down",
            FaultPredicate::category("obstacle"),
            slow_down,
            5,
        ))
        .with_entry(FaultResponseEntry::new(
            "emergency-stop",
            FaultPredicate::category("collision"),
            emergency,
            10,
        ));

    let mut interface = ActionInterface::new();
    for (name, model) in [("patrol", "Patrol"), ("brake", "Brake"), ("creep", "Creep")] {
        interface.register(ActionModel::new(name, model))?;
    }
    interface.register(
        ActionModel::new("halt", "Halt").with_argument(ArgumentSpec::required("reason")),
    )?;

    let context = CoordinationContext::new(root, patrol)
        .with_actions(Arc::new(interface))
        .with_fault_table(table);
    let mut coordinator = Coordinator::new(plan);
    let id = coordinator.add(context);
    coordinator.start(&id)?;
    settle(&mut coordinator, &id);

    let patrol_task = current_task(&coordinator, &id)?;
    ok(&format!("patrolling with {}", patrol_task));

    warn("obstacle detected");
    coordinator.provider_mut().raise(&patrol_task, "obstacle");
    settle(&mut coordinator, &id);
    let brake = handler_task(&coordinator, &id)?;
    coordinator.provider_mut().succeed(&brake);
    settle(&mut coordinator, &id);
    info(&format!("slow-down now running {}", handler_task(&coordinator, &id)?));

    warn("collision detected");
    coordinator.provider_mut().raise(&patrol_task, "collision");
    settle(&mut coordinator, &id);
    let halt = handler_task(&coordinator, &id)?;
    let reason = coordinator.provider().argument(&halt, "reason");
    ok(&format!(
        "emergency-stop preempted slow-down; {} started with reason {:?}",
        halt, reason
    ));

    coordinator.provider_mut().succeed(&halt);
    settle(&mut coordinator, &id);

    let context = coordinator.context(&id).context("context vanished")?;
    for disposition in [
        FaultDisposition::Triggered,
        FaultDisposition::Preempted,
        FaultDisposition::Dropped,
        FaultDisposition::Resolved,
    ] {
        info(&format!(
            "{:<10} {}",
            disposition.to_string(),
            context.provenance().faults(disposition).len()
        ));
    }
    ok(&format!(
        "resumed patrol with {}",
        current_task(&coordinator, &id)?
    ));
    Ok(())
}
