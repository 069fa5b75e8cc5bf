//! Action models: named, parameterized ways to produce a task

use crate::{Arguments, CoordinationError, CoordinationResult, TaskDescription, Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Declaration of one action argument
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    /// Value used when the caller binds nothing; `None` makes the
    /// argument required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ArgumentSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            default: Some(default.into()),
        }
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// An action exposed by the root's action interface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionModel {
    pub name: String,
    /// Task model the action instantiates
    pub returns: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentSpec>,
}

impl ActionModel {
    pub fn new(name: impl Into<String>, returns: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            returns: returns.into(),
            description: String::new(),
            arguments: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_argument(mut self, spec: ArgumentSpec) -> Self {
        self.arguments.push(spec);
        self
    }

    /// Check bound arguments against the declaration and fill defaults.
    ///
    /// Unknown, missing, or mistyped arguments make the action
    /// unresolvable.
    pub fn bind(&self, bound: Arguments) -> CoordinationResult<TaskDescription> {
        for name in bound.keys() {
            if !self.arguments.iter().any(|spec| &spec.name == name) {
                return Err(CoordinationError::UnresolvableSource(format!(
                    "action '{}' has no argument '{}'",
                    self.name, name
                )));
            }
        }

        let mut arguments = bound;
        for spec in &self.arguments {
            if !arguments.contains_key(&spec.name) {
                match &spec.default {
                    Some(default) => {
                        arguments.insert(spec.name.clone(), default.clone());
                    }
                    None => {
                        return Err(CoordinationError::UnresolvableSource(format!(
                            "action '{}' is missing required argument '{}'",
                            self.name, spec.name
                        )));
                    }
                }
            }
            if let (Some(kind), Some(value)) = (spec.kind, arguments.get(&spec.name)) {
                if value.kind() != kind {
                    return Err(CoordinationError::UnresolvableSource(format!(
                        "argument '{}' of action '{}' expects {}, got {}",
                        spec.name,
                        self.name,
                        kind,
                        value.kind()
                    )));
                }
            }
        }

        Ok(TaskDescription {
            model: self.returns.clone(),
            arguments,
        })
    }
}
