//! Fault response tables and the dispatcher that picks handlers
//!
//! The dispatcher decides, the context acts. Given a fault it says which
//! entry should handle it and whether that means starting a handler,
//! preempting the active one, queueing, or giving up. Tables are kept
//! innermost first; escalation moves outward.

use crate::ModelEngine;
use coordination_types::{EntryState, Fault, FaultResponseEntry, FaultScope};
use std::collections::VecDeque;

/// A prioritized list of fault response entries
#[derive(Clone, Debug)]
pub struct FaultResponseTable {
    name: String,
    entries: Vec<FaultResponseEntry>,
    states: Vec<EntryState>,
}

impl FaultResponseTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            states: Vec::new(),
        }
    }

    /// Register an entry, returning its index
    pub fn register(&mut self, entry: FaultResponseEntry) -> usize {
        tracing::debug!(
            table = %self.name,
            entry = %entry.name,
            priority = entry.priority,
            scope = ?entry.scope,
            "Fault response registered"
        );
        self.entries.push(entry);
        self.states.push(EntryState::Idle);
        self.entries.len() - 1
    }

    pub fn with_entry(mut self, entry: FaultResponseEntry) -> Self {
        self.register(entry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[FaultResponseEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&FaultResponseEntry> {
        self.entries.get(index)
    }

    pub fn state(&self, index: usize) -> Option<EntryState> {
        self.states.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The matching, in-scope entry with the highest priority. Ties go to
    /// the earliest registration.
    pub fn select(&self, fault: &Fault, in_scope: &dyn Fn(FaultScope) -> bool) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.predicate.matches(fault) || !in_scope(entry.scope) {
                continue;
            }
            match best {
                Some(b) if self.entries[b].priority >= entry.priority => {}
                _ => best = Some(index),
            }
        }
        best
    }

    /// Move an entry along its lifecycle. Illegal steps are refused.
    pub fn transition(&mut self, index: usize, next: EntryState) -> bool {
        let current = match self.states.get(index) {
            Some(state) => *state,
            None => return false,
        };
        if !current.can_transition_to(next) {
            tracing::warn!(
                table = %self.name,
                entry = index,
                from = %current,
                to = %next,
                "Illegal fault entry transition refused"
            );
            return false;
        }
        self.states[index] = next;
        tracing::trace!(table = %self.name, entry = index, state = %next, "Fault entry state");
        true
    }
}

/// What to do with a fault
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultDecision {
    /// No handler is running; start this one
    Activate { table: usize, entry: usize },
    /// A lower-priority handler is running; replace it with this one
    Preempt { table: usize, entry: usize },
    /// A handler of equal or higher priority is running; wait for it
    Queue,
    /// Nothing in scope matches
    Unhandled,
}

/// The handler currently running in place of the normal model
#[derive(Debug)]
pub struct ActiveHandler {
    pub table: usize,
    pub entry: usize,
    pub priority: i32,
    pub fault: Fault,
    pub engine: ModelEngine,
}

/// Fault tables of a context, plus the active handler and the queue
#[derive(Debug)]
pub struct FaultDispatcher {
    tables: Vec<FaultResponseTable>,
    active: Option<ActiveHandler>,
    pending: VecDeque<Fault>,
    limit: usize,
}

impl FaultDispatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            tables: Vec::new(),
            active: None,
            pending: VecDeque::new(),
            limit,
        }
    }

    /// Change the queue bound; faults beyond it are dropped oldest first
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        while self.pending.len() > limit {
            self.pending.pop_front();
        }
    }

    /// Add an enclosing table. The first table added is the innermost.
    pub fn add_table(&mut self, table: FaultResponseTable) {
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[FaultResponseTable] {
        &self.tables
    }

    pub fn entry(&self, table: usize, entry: usize) -> Option<&FaultResponseEntry> {
        self.tables.get(table).and_then(|t| t.entry(entry))
    }

    pub fn entry_state(&self, table: usize, entry: usize) -> Option<EntryState> {
        self.tables.get(table).and_then(|t| t.state(entry))
    }

    pub fn set_entry_state(&mut self, table: usize, entry: usize, next: EntryState) -> bool {
        self.tables
            .get_mut(table)
            .map(|t| t.transition(entry, next))
            .unwrap_or(false)
    }

    // ── Decisions ────────────────────────────────────────────────────

    /// Nearest table at or after `from` holding a matching entry
    pub fn select_from(
        &self,
        fault: &Fault,
        from: usize,
        in_scope: &dyn Fn(FaultScope) -> bool,
    ) -> Option<(usize, usize)> {
        self.tables
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(t, table)| table.select(fault, in_scope).map(|e| (t, e)))
    }

    pub fn decide(&self, fault: &Fault, in_scope: &dyn Fn(FaultScope) -> bool) -> FaultDecision {
        let (table, entry) = match self.select_from(fault, 0, in_scope) {
            Some(found) => found,
            None => return FaultDecision::Unhandled,
        };
        let priority = self.tables[table].entries[entry].priority;
        match &self.active {
            None => FaultDecision::Activate { table, entry },
            Some(active) if priority > active.priority => FaultDecision::Preempt { table, entry },
            Some(_) => FaultDecision::Queue,
        }
    }

    /// Where a fault goes when the handler from `failed_table` fails
    pub fn escalation_target(
        &self,
        fault: &Fault,
        failed_table: usize,
        in_scope: &dyn Fn(FaultScope) -> bool,
    ) -> Option<(usize, usize)> {
        self.select_from(fault, failed_table + 1, in_scope)
    }

    // ── Active handler ───────────────────────────────────────────────

    pub fn active(&self) -> Option<&ActiveHandler> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveHandler> {
        self.active.as_mut()
    }

    pub fn set_active(&mut self, handler: ActiveHandler) {
        self.active = Some(handler);
    }

    pub fn take_active(&mut self) -> Option<ActiveHandler> {
        self.active.take()
    }

    pub fn is_handling(&self) -> bool {
        self.active.is_some()
    }

    // ── Queue ────────────────────────────────────────────────────────

    /// Queue a fault behind the active handler, returning the fault
    /// dropped to make room, if any
    pub fn enqueue(&mut self, fault: Fault) -> Option<Fault> {
        let dropped = if self.pending.len() >= self.limit {
            self.pending.pop_front()
        } else {
            None
        };
        if self.limit > 0 {
            self.pending.push_back(fault);
            dropped
        } else {
            Some(fault)
        }
    }

    pub fn next_pending(&mut self) -> Option<Fault> {
        self.pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lane;
    use coordination_types::{
        CoordinationModel, FaultPredicate, Instruction, Script, TaskId, TaskSource,
    };

    fn handler(name: &str) -> Script {
        Script::builder(name)
            .instruction(Instruction::run("fix", TaskSource::action("fix")))
            .build()
            .unwrap()
    }

    fn entry(name: &str, predicate: FaultPredicate, priority: i32) -> FaultResponseEntry {
        FaultResponseEntry::new(name, predicate, handler(name), priority)
    }

    fn local_only(scope: FaultScope) -> bool {
        scope == FaultScope::Local
    }

    fn fault(category: &str) -> Fault {
        Fault::new(TaskId::new("child"), category)
    }

    #[test]
    fn test_select_highest_priority_earliest_on_tie() {
        let table = FaultResponseTable::new("t")
            .with_entry(entry("low", FaultPredicate::Any, 1))
            .with_entry(entry("high-a", FaultPredicate::Any, 5))
            .with_entry(entry("high-b", FaultPredicate::Any, 5))
            .with_entry(entry("other", FaultPredicate::category("battery"), 9));

        assert_eq!(table.select(&fault("collision"), &local_only), Some(1));
        assert_eq!(table.select(&fault("battery"), &local_only), Some(3));
    }

    #[test]
    fn test_scope_filter() {
        let table = FaultResponseTable::new("t").with_entry(
            entry("deep", FaultPredicate::Any, 1).with_scope(FaultScope::Propagating),
        );
        assert_eq!(table.select(&fault("x"), &local_only), None);
        assert_eq!(table.select(&fault("x"), &|_| true), Some(0));
    }

    #[test]
    fn test_decisions() {
        let mut dispatcher = FaultDispatcher::new(4);
        dispatcher.add_table(
            FaultResponseTable::new("t")
                .with_entry(entry("minor", FaultPredicate::category("minor"), 5))
                .with_entry(entry("major", FaultPredicate::category("major"), 10)),
        );

        assert_eq!(
            dispatcher.decide(&fault("minor"), &local_only),
            FaultDecision::Activate { table: 0, entry: 0 }
        );
        assert_eq!(dispatcher.decide(&fault("none"), &local_only), FaultDecision::Unhandled);

        let model = CoordinationModel::from(handler("minor"));
        dispatcher.set_active(ActiveHandler {
            table: 0,
            entry: 0,
            priority: 5,
            fault: fault("minor"),
            engine: ModelEngine::new(&model, Lane::Handler, 2),
        });
        assert_eq!(
            dispatcher.decide(&fault("major"), &local_only),
            FaultDecision::Preempt { table: 0, entry: 1 }
        );
        assert_eq!(dispatcher.decide(&fault("minor"), &local_only), FaultDecision::Queue);
    }

    #[test]
    fn test_escalation_moves_outward() {
        let mut dispatcher = FaultDispatcher::new(4);
        dispatcher.add_table(FaultResponseTable::new("inner").with_entry(entry("a", FaultPredicate::Any, 1)));
        dispatcher.add_table(FaultResponseTable::new("middle"));
        dispatcher.add_table(FaultResponseTable::new("outer").with_entry(entry("b", FaultPredicate::Any, 1)));

        assert_eq!(dispatcher.escalation_target(&fault("x"), 0, &local_only), Some((2, 0)));
        assert_eq!(dispatcher.escalation_target(&fault("x"), 2, &local_only), None);
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut dispatcher = FaultDispatcher::new(2);
        assert!(dispatcher.enqueue(fault("a")).is_none());
        assert!(dispatcher.enqueue(fault("b")).is_none());
        let dropped = dispatcher.enqueue(fault("c")).unwrap();
        assert_eq!(dropped.category.as_str(), "a");
        assert_eq!(dispatcher.pending_len(), 2);
        assert_eq!(dispatcher.next_pending().unwrap().category.as_str(), "b");
    }

    #[test]
    fn test_entry_lifecycle_enforced() {
        let mut table = FaultResponseTable::new("t").with_entry(entry("a", FaultPredicate::Any, 1));
        assert!(!table.transition(0, EntryState::Handling));
        assert!(table.transition(0, EntryState::Triggered));
        assert!(table.transition(0, EntryState::Handling));
        assert!(table.transition(0, EntryState::Resolved));
        assert!(table.transition(0, EntryState::Idle));
        assert_eq!(table.state(0), Some(EntryState::Idle));
    }
}
