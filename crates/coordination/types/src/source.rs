//! Task sources: how a step obtains its sub-task

use crate::{AsPlan, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Value bound to an argument of an action or builder
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgBinding {
    Value(Value),
    /// Resolved from a variable when the source is resolved
    Variable(String),
}

impl From<Value> for ArgBinding {
    fn from(value: Value) -> Self {
        ArgBinding::Value(value)
    }
}

impl From<i64> for ArgBinding {
    fn from(i: i64) -> Self {
        ArgBinding::Value(Value::Int(i))
    }
}

impl From<bool> for ArgBinding {
    fn from(b: bool) -> Self {
        ArgBinding::Value(Value::Bool(b))
    }
}

impl From<&str> for ArgBinding {
    fn from(s: &str) -> Self {
        ArgBinding::Value(Value::text(s))
    }
}

/// Strategy for obtaining the task of a step or state
#[derive(Clone, Debug)]
pub enum TaskSource {
    /// Instantiate a registered action with bound arguments
    FromAction {
        action: String,
        arguments: BTreeMap<String, ArgBinding>,
    },
    /// Invoke a registered builder
    FromInstantiationObject {
        builder: String,
        arguments: BTreeMap<String, ArgBinding>,
    },
    /// Reuse the task held by a variable
    FromVariable(String),
    /// Ask a description object for its plan task
    FromAsPlan(Arc<dyn AsPlan>),
}

impl TaskSource {
    pub fn action(name: impl Into<String>) -> Self {
        Self::FromAction {
            action: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> Self {
        Self::FromInstantiationObject {
            builder: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::FromVariable(name.into())
    }

    pub fn as_plan(description: Arc<dyn AsPlan>) -> Self {
        Self::FromAsPlan(description)
    }

    /// Bind an argument. Has no effect on variable and as-plan sources.
    pub fn with_argument(mut self, name: impl Into<String>, binding: impl Into<ArgBinding>) -> Self {
        match &mut self {
            TaskSource::FromAction { arguments, .. }
            | TaskSource::FromInstantiationObject { arguments, .. } => {
                arguments.insert(name.into(), binding.into());
            }
            TaskSource::FromVariable(_) | TaskSource::FromAsPlan(_) => {}
        }
        self
    }

    /// Bind an argument to the value of a variable
    pub fn with_variable_argument(
        self,
        name: impl Into<String>,
        variable: impl Into<String>,
    ) -> Self {
        self.with_argument(name, ArgBinding::Variable(variable.into()))
    }

    /// Short description used in role strings and logs
    pub fn label(&self) -> String {
        match self {
            TaskSource::FromAction { action, .. } => format!("action:{}", action),
            TaskSource::FromInstantiationObject { builder, .. } => format!("builder:{}", builder),
            TaskSource::FromVariable(name) => format!("var:{}", name),
            TaskSource::FromAsPlan(plan) => format!("plan:{}", plan.name()),
        }
    }
}
