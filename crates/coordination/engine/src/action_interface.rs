//! Action interface and builder registry: the named ways a step can
//! obtain its task
//!
//! Both registries are immutable once a context is built and may be
//! shared between contexts behind an `Arc`.

use coordination_types::{ActionModel, CoordinationError, CoordinationResult, TaskBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The actions a coordinated root exposes
#[derive(Clone, Debug, Default)]
pub struct ActionInterface {
    actions: BTreeMap<String, ActionModel>,
}

impl ActionInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Names are unique within an interface.
    pub fn register(&mut self, action: ActionModel) -> CoordinationResult<()> {
        if self.actions.contains_key(&action.name) {
            return Err(CoordinationError::InvalidModel(format!(
                "Action '{}' registered twice",
                action.name
            )));
        }
        tracing::info!(action = %action.name, returns = %action.returns, "Action registered");
        self.actions.insert(action.name.clone(), action);
        Ok(())
    }

    /// Builder-style [`ActionInterface::register`]
    pub fn with_action(mut self, action: ActionModel) -> CoordinationResult<Self> {
        self.register(action)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ActionModel> {
        self.actions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Caller-supplied task builders, by name
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: BTreeMap<String, Arc<dyn TaskBuilder + Send + Sync>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder, replacing any builder of the same name
    pub fn register<B>(&mut self, name: impl Into<String>, builder: B)
    where
        B: TaskBuilder + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(builder = %name, "Task builder registered");
        self.builders.insert(name, Arc::new(builder));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TaskBuilder + Send + Sync>> {
        self.builders.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("builders", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination_types::{Arguments, ProviderError, TaskDescription, TaskHandle, TaskProvider};

    #[test]
    fn test_register_and_get() {
        let interface = ActionInterface::new()
            .with_action(ActionModel::new("approach", "Approach"))
            .unwrap()
            .with_action(ActionModel::new("dock", "Dock"))
            .unwrap();
        assert_eq!(interface.len(), 2);
        assert_eq!(interface.get("dock").unwrap().returns, "Dock");
        assert_eq!(interface.names(), vec!["approach", "dock"]);
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let mut interface = ActionInterface::new();
        interface.register(ActionModel::new("a", "A")).unwrap();
        assert!(matches!(
            interface.register(ActionModel::new("a", "B")),
            Err(CoordinationError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_builder_registry() {
        let mut registry = BuilderRegistry::new();
        registry.register(
            "survey",
            |provider: &mut dyn TaskProvider, _args: &Arguments| -> Result<TaskHandle, ProviderError> {
                provider.instantiate(&TaskDescription::new("Survey"))
            },
        );
        assert!(registry.contains("survey"));
        assert!(registry.get("missing").is_none());
        assert_eq!(format!("{:?}", registry), "BuilderRegistry { builders: [\"survey\"] }");
    }
}
