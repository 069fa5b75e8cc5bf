//! Variable bindings: layered scopes with lazy resolution
//!
//! Scope 0 belongs to the context itself and holds values written under
//! names nobody declared. The normal model's scope sits above it and an
//! active fault handler pushes one more on top. Lookups run innermost
//! first; writes land in the nearest scope that declares the name.

use coordination_types::{
    CoordinationError, CoordinationResult, Resolution, TaskHandle, TaskProvider, Value,
    VariableDecl,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What lazy resolution may consult
pub struct ResolutionEnv<'a> {
    pub provider: &'a dyn TaskProvider,
    pub root: &'a TaskHandle,
}

/// One layer of variables owned by a single model activation
#[derive(Clone, Debug)]
pub struct VariableScope {
    owner: String,
    decls: Vec<VariableDecl>,
    values: HashMap<String, Value>,
    written: HashSet<String>,
    outputs: HashMap<String, Value>,
}

impl VariableScope {
    fn new(owner: impl Into<String>, decls: &[VariableDecl]) -> Self {
        Self {
            owner: owner.into(),
            decls: decls.to_vec(),
            values: HashMap::new(),
            written: HashSet::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn decl(&self, name: &str) -> Option<&VariableDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    fn knows(&self, name: &str) -> bool {
        self.decl(name).is_some() || self.values.contains_key(name)
    }
}

/// The stack of variable scopes of one coordination context
#[derive(Clone, Debug)]
pub struct Bindings {
    scopes: Vec<VariableScope>,
}

impl Bindings {
    pub fn new() -> Self {
        Self {
            scopes: vec![VariableScope::new("context", &[])],
        }
    }

    // ── Scope management ─────────────────────────────────────────────

    /// Push a scope for a model activation, returning its depth
    pub fn push_scope(&mut self, owner: impl Into<String>, decls: &[VariableDecl]) -> usize {
        self.scopes.push(VariableScope::new(owner, decls));
        self.scopes.len() - 1
    }

    /// Pop the innermost scope. The context scope is never popped.
    pub fn pop_scope(&mut self) -> Option<VariableScope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Forget everything resolved in a scope so it is re-evaluated on
    /// the next read. Explicit writes survive.
    pub fn reset_scope(&mut self, depth: usize) {
        if let Some(scope) = self.scopes.get_mut(depth) {
            let written = &scope.written;
            scope.values.retain(|name, _| written.contains(name));
            scope.outputs.clear();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read a variable, resolving it on first access.
    ///
    /// Constants and root arguments are cached for the rest of the
    /// activation; step outputs are read through so a re-run step is
    /// always seen with its latest payload.
    pub fn get(&mut self, name: &str, env: &ResolutionEnv<'_>) -> CoordinationResult<Value> {
        let depth = self
            .scopes
            .iter()
            .rposition(|s| s.knows(name))
            .ok_or_else(|| CoordinationError::UnboundVariable(name.to_string()))?;

        if let Some(value) = self.scopes[depth].values.get(name) {
            return Ok(value.clone());
        }

        let decl = match self.scopes[depth].decl(name) {
            Some(decl) => decl.clone(),
            None => return Err(CoordinationError::UnboundVariable(name.to_string())),
        };

        let (value, cache) = match &decl.resolution {
            Resolution::Constant(value) => (value.clone(), true),
            Resolution::Argument(argument) => {
                let value = env
                    .provider
                    .argument(env.root, argument)
                    .ok_or_else(|| CoordinationError::UnboundVariable(name.to_string()))?;
                (value, true)
            }
            Resolution::StepOutput(step) => {
                let value = self
                    .output(step)
                    .cloned()
                    .ok_or_else(|| CoordinationError::UnboundVariable(name.to_string()))?;
                (value, false)
            }
            Resolution::Assigned => {
                return Err(CoordinationError::UnboundVariable(name.to_string()));
            }
        };

        check_kind(&decl, &value)?;
        if cache {
            self.scopes[depth]
                .values
                .insert(name.to_string(), value.clone());
        }
        tracing::trace!(variable = name, value = %value, "Variable resolved");
        Ok(value)
    }

    /// The cached or written value of a variable, without resolving
    pub fn peek(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.values.get(name))
    }

    /// Recorded output of a step, innermost scope first
    pub fn output(&self, step: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.outputs.get(step))
    }

    /// Every value currently held, with inner scopes shadowing outer ones
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for scope in &self.scopes {
            for (name, value) in &scope.values {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write a variable into the nearest scope that declares it, or into
    /// the context scope when no model declares it
    pub fn set(&mut self, name: &str, value: Value) -> CoordinationResult<()> {
        let depth = self
            .scopes
            .iter()
            .rposition(|s| s.knows(name))
            .unwrap_or(0);

        if let Some(decl) = self.scopes[depth].decl(name) {
            check_kind(decl, &value)?;
        }

        tracing::debug!(
            variable = name,
            value = %value,
            scope = %self.scopes[depth].owner,
            "Variable written"
        );
        let scope = &mut self.scopes[depth];
        scope.values.insert(name.to_string(), value);
        scope.written.insert(name.to_string());
        Ok(())
    }

    /// Record the payload a step exited with, in the scope at `depth`
    pub fn record_output(&mut self, depth: usize, step: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.get_mut(depth) {
            scope.outputs.insert(step.into(), value);
        }
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

fn check_kind(decl: &VariableDecl, value: &Value) -> CoordinationResult<()> {
    match decl.kind {
        Some(kind) if value.kind() != kind => Err(CoordinationError::TypeMismatch {
            name: decl.name.clone(),
            expected: kind.to_string(),
            actual: value.kind().to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedPlan;
    use coordination_types::ValueKind;

    fn env_parts() -> (SimulatedPlan, TaskHandle) {
        let mut plan = SimulatedPlan::new();
        let root = plan.add_root("Mission");
        plan.set_root_argument(&root, "target", Value::text("dock-3"));
        (plan, root)
    }

    #[test]
    fn test_lazy_argument_resolution() {
        let (plan, root) = env_parts();
        let env = ResolutionEnv {
            provider: &plan,
            root: &root,
        };
        let mut bindings = Bindings::new();
        bindings.push_scope("m", &[VariableDecl::argument("goal", "target")]);

        assert!(bindings.peek("goal").is_none());
        assert_eq!(bindings.get("goal", &env).unwrap(), Value::text("dock-3"));
        assert_eq!(bindings.peek("goal"), Some(&Value::text("dock-3")));
    }

    #[test]
    fn test_unbound_and_mismatch() {
        let (plan, root) = env_parts();
        let env = ResolutionEnv {
            provider: &plan,
            root: &root,
        };
        let mut bindings = Bindings::new();
        bindings.push_scope(
            "m",
            &[
                VariableDecl::assigned("later"),
                VariableDecl::argument("missing", "nope"),
                VariableDecl::constant("n", 3i64).with_kind(ValueKind::Text),
            ],
        );

        assert!(matches!(
            bindings.get("later", &env),
            Err(CoordinationError::UnboundVariable(_))
        ));
        assert!(matches!(
            bindings.get("missing", &env),
            Err(CoordinationError::UnboundVariable(_))
        ));
        assert!(matches!(
            bindings.get("n", &env),
            Err(CoordinationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            bindings.get("undeclared", &env),
            Err(CoordinationError::UnboundVariable(_))
        ));
    }

    #[test]
    fn test_write_targets_nearest_declaring_scope() {
        let mut bindings = Bindings::new();
        let model = bindings.push_scope("model", &[VariableDecl::assigned("mode")]);
        bindings.push_scope("handler", &[VariableDecl::assigned("local")]);

        bindings.set("mode", Value::text("safe")).unwrap();
        bindings.set("local", Value::Int(1)).unwrap();
        bindings.set("shared", Value::Bool(true)).unwrap();

        bindings.pop_scope();
        assert_eq!(bindings.peek("mode"), Some(&Value::text("safe")));
        assert_eq!(bindings.peek("shared"), Some(&Value::Bool(true)));
        assert!(bindings.peek("local").is_none());

        bindings.reset_scope(model);
        assert_eq!(bindings.peek("mode"), Some(&Value::text("safe")));
    }

    #[test]
    fn test_reset_forgets_resolved_values() {
        let (mut plan, root) = env_parts();
        let mut bindings = Bindings::new();
        let depth = bindings.push_scope("m", &[VariableDecl::argument("goal", "target")]);
        {
            let env = ResolutionEnv {
                provider: &plan,
                root: &root,
            };
            bindings.get("goal", &env).unwrap();
        }

        plan.set_root_argument(&root, "target", Value::text("dock-7"));
        bindings.reset_scope(depth);
        let env = ResolutionEnv {
            provider: &plan,
            root: &root,
        };
        assert_eq!(bindings.get("goal", &env).unwrap(), Value::text("dock-7"));
    }

    #[test]
    fn test_step_output_read_through() {
        let (plan, root) = env_parts();
        let env = ResolutionEnv {
            provider: &plan,
            root: &root,
        };
        let mut bindings = Bindings::new();
        let depth = bindings.push_scope("m", &[VariableDecl::step_output("pose", "locate")]);

        assert!(bindings.get("pose", &env).is_err());
        bindings.record_output(depth, "locate", Value::Int(4));
        assert_eq!(bindings.get("pose", &env).unwrap(), Value::Int(4));
        bindings.record_output(depth, "locate", Value::Int(5));
        assert_eq!(bindings.get("pose", &env).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_typed_write_rejected() {
        let mut bindings = Bindings::new();
        bindings.push_scope("m", &[VariableDecl::assigned("n").with_kind(ValueKind::Int)]);
        assert!(bindings.set("n", Value::text("x")).is_err());
        assert!(bindings.set("n", Value::Int(2)).is_ok());
    }
}
