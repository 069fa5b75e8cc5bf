//! Runtime configuration for coordination contexts

use serde::{Deserialize, Serialize};

/// Default bound on faults waiting behind an active handler
pub const DEFAULT_PENDING_FAULT_LIMIT: usize = 16;

/// Default upper bound on signals delivered by one coordinator run
pub const DEFAULT_MAX_DELIVERIES: usize = 10_000;

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Per-context settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Faults queued while a handler runs; the oldest is dropped when full
    pub pending_fault_limit: usize,
    /// Keep an in-memory provenance trail of every step
    pub record_provenance: bool,
    /// Prefix of the roles children are attached under
    pub role_prefix: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            pending_fault_limit: DEFAULT_PENDING_FAULT_LIMIT,
            record_provenance: true,
            role_prefix: "coordination".to_string(),
        }
    }
}

impl ContextConfig {
    /// Load from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ContextConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "role_prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.role_prefix.contains('/') {
            return Err(ConfigError::Invalid {
                field: "role_prefix",
                reason: "must not contain '/'".into(),
            });
        }
        Ok(())
    }

    pub fn with_pending_fault_limit(mut self, limit: usize) -> Self {
        self.pending_fault_limit = limit;
        self
    }

    pub fn with_role_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.role_prefix = prefix.into();
        self
    }

    pub fn without_provenance(mut self) -> Self {
        self.record_provenance = false;
        self
    }
}

/// Settings for a [`crate::Coordinator`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stop a run after this many deliveries, even if signals remain
    pub max_deliveries_per_run: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_deliveries_per_run: DEFAULT_MAX_DELIVERIES,
        }
    }
}
