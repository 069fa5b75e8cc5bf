//! Error types for the coordination layer

use crate::{ContextId, ProviderError, StateId};

/// Errors that can occur while building or running coordination models
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("Task source cannot be resolved: {0}")]
    UnresolvableSource(String),

    #[error("Variable not bound in the current activation: {0}")]
    UnboundVariable(String),

    #[error("Variable does not hold a task: {0}")]
    NotATask(String),

    #[error("Instruction {0} failed")]
    InstructionFailed(usize),

    #[error("No applicable transition out of state '{0}'")]
    NoApplicableTransition(StateId),

    #[error("Model is already running")]
    AlreadyRunning,

    #[error("Script has no instructions")]
    EmptyScript,

    #[error("Fault escalation exhausted every enclosing fault table")]
    HandlerEscalationExhausted,

    #[error("Model is not running")]
    NotRunning,

    #[error("Unknown coordination context: {0}")]
    UnknownContext(ContextId),

    #[error("No initial state defined")]
    NoInitialState,

    #[error("Duplicate state: {0}")]
    DuplicateState(StateId),

    #[error("Unknown state: {0}")]
    UnknownState(StateId),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Variable '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Task provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl CoordinationError {
    /// Errors raised while building a step; fatal to the activation
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            CoordinationError::UnresolvableSource(_)
                | CoordinationError::UnboundVariable(_)
                | CoordinationError::NotATask(_)
                | CoordinationError::TypeMismatch { .. }
        )
    }
}

/// Result type alias for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_conversion() {
        let err: CoordinationError = ProviderError::UnknownTask("t1".into()).into();
        assert!(matches!(err, CoordinationError::Provider(_)));
        assert_eq!(err.to_string(), "Task provider error: Unknown task: t1");
    }

    #[test]
    fn test_resolution_errors() {
        assert!(CoordinationError::UnboundVariable("x".into()).is_resolution_error());
        assert!(!CoordinationError::EmptyScript.is_resolution_error());
    }
}
