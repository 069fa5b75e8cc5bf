//! Lifecycle observer: how a context reports its end to the owning task

use coordination_types::{Completion, CoordinationError, Fault};

/// Callbacks fired when a context reaches a terminal outcome.
///
/// Exactly one of `on_success`, `on_recovered` or `on_failure` fires per
/// context run. `on_fault_escalated` fires before `on_failure` when a
/// fault exhausted every table.
pub trait LifecycleObserver {
    /// The model finished without passing through a failed sub-task
    fn on_success(&mut self, _completion: &Completion) {}

    /// The model finished, but the path went through a failed sub-task
    fn on_recovered(&mut self, _completion: &Completion) {}

    fn on_failure(&mut self, _error: &CoordinationError) {}

    /// No fault table could handle a fault
    fn on_fault_escalated(&mut self, _fault: &Fault) {}
}

/// Outcome counters; handy in tests and demos
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingObserver {
    pub successes: Vec<Completion>,
    pub recoveries: Vec<Completion>,
    pub failures: Vec<CoordinationError>,
    pub escalated: Vec<Fault>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total terminal callbacks received
    pub fn terminal_count(&self) -> usize {
        self.successes.len() + self.recoveries.len() + self.failures.len()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_success(&mut self, completion: &Completion) {
        self.successes.push(completion.clone());
    }

    fn on_recovered(&mut self, completion: &Completion) {
        self.recoveries.push(completion.clone());
    }

    fn on_failure(&mut self, error: &CoordinationError) {
        self.failures.push(error.clone());
    }

    fn on_fault_escalated(&mut self, fault: &Fault) {
        self.escalated.push(fault.clone());
    }
}

/// Shares a [`RecordingObserver`] between a context and the code that
/// inspects it afterwards
#[derive(Clone, Debug, Default)]
pub struct SharedObserver(pub std::sync::Arc<std::sync::Mutex<RecordingObserver>>);

impl SharedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far
    pub fn snapshot(&self) -> RecordingObserver {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with(&self, f: impl FnOnce(&mut RecordingObserver)) {
        match self.0.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl LifecycleObserver for SharedObserver {
    fn on_success(&mut self, completion: &Completion) {
        self.with(|r| r.on_success(completion));
    }

    fn on_recovered(&mut self, completion: &Completion) {
        self.with(|r| r.on_recovered(completion));
    }

    fn on_failure(&mut self, error: &CoordinationError) {
        self.with(|r| r.on_failure(error));
    }

    fn on_fault_escalated(&mut self, fault: &Fault) {
        self.with(|r| r.on_fault_escalated(fault));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_observer_records() {
        let shared = SharedObserver::new();
        let mut handle: Box<dyn LifecycleObserver> = Box::new(shared.clone());
        handle.on_failure(&CoordinationError::EmptyScript);

        let seen = shared.snapshot();
        assert_eq!(seen.failures, vec![CoordinationError::EmptyScript]);
        assert_eq!(seen.terminal_count(), 1);
    }
}
