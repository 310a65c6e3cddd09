//! Configuration system for engrave.

mod parameters;

pub use parameters::Parameters;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngraveError, EngraveResult};

/// Main engine configuration.
///
/// `EngineConfig::default()` is the one documented preset. Every field can be
/// overridden from a file, the environment, or the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial numeric parameters; the adaptive tuner evolves a copy.
    pub parameters: Parameters,
    /// Track co-activations and form Hebbian links on recall.
    pub hebbian_enabled: bool,
    /// Whether recall expands through Hebbian neighbors unless told otherwise.
    pub graph_expand_default: bool,
    /// Path to the SQLite database.
    pub database_path: PathBuf,
    /// Minutes between background consolidation cycles.
    pub consolidation_interval_minutes: u64,
    /// Run one consolidation cycle as soon as the scheduler starts.
    pub consolidation_run_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let engrave_dir = dirs::home_dir()
            .map(|h| h.join(".engrave"))
            .unwrap_or_else(|| PathBuf::from(".engrave"));

        Self {
            parameters: Parameters::default(),
            hebbian_enabled: true,
            graph_expand_default: true,
            database_path: engrave_dir.join("memory.db"),
            consolidation_interval_minutes: 60,
            consolidation_run_on_start: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> EngraveResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| EngraveError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| EngraveError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| EngraveError::Configuration(e.to_string()))?,
            _ => {
                return Err(EngraveError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ENGRAVE_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(minutes) = std::env::var("ENGRAVE_CONSOLIDATION_INTERVAL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.consolidation_interval_minutes = minutes;
        }
        if let Ok(value) = std::env::var("ENGRAVE_CONSOLIDATION_RUN_ON_START") {
            config.consolidation_run_on_start = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("ENGRAVE_DISABLE_HEBBIAN") {
            config.hebbian_enabled = !matches!(value.as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EngraveResult<()> {
        self.parameters.validate()?;
        if self.consolidation_interval_minutes == 0 {
            return Err(EngraveError::out_of_range(
                "consolidation_interval_minutes",
                "consolidation_interval_minutes must be at least 1",
            ));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the full parameter set.
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.config.parameters = parameters;
        self
    }

    /// Enable or disable Hebbian link formation.
    pub fn hebbian_enabled(mut self, enabled: bool) -> Self {
        self.config.hebbian_enabled = enabled;
        self
    }

    /// Set the default for graph expansion during recall.
    pub fn graph_expand_default(mut self, enabled: bool) -> Self {
        self.config.graph_expand_default = enabled;
        self
    }

    /// Set database path.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Set the background consolidation interval.
    pub fn consolidation_interval_minutes(mut self, minutes: u64) -> Self {
        self.config.consolidation_interval_minutes = minutes;
        self
    }

    /// Run consolidation when the scheduler starts.
    pub fn consolidation_run_on_start(mut self, run: bool) -> Self {
        self.config.consolidation_run_on_start = run;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> EngraveResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
