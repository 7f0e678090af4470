//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod acquisition;
mod runtime;
mod storage;

pub use acquisition::{AcquisitionConfig, CoordinatorConfig, FlowSourceConfig};
pub use runtime::{EventSinkKind, EventsConfig, ScheduleConfig, WatcherConfig};
pub use storage::StorageConfig;

use serde::Deserialize;
use uuid::Uuid;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FDR_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FDR";
/// Default job name guarded by the execution mutex.
pub const DEFAULT_JOB_NAME: &str = "fdr-reconciliation";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_node_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of this node in execution records.
    pub node_id: String,
    /// Job name shared by every node of the fleet.
    pub job_name: String,
    pub storage: StorageConfig,
    pub flow_source: FlowSourceConfig,
    pub acquisition: AcquisitionConfig,
    pub coordinator: CoordinatorConfig,
    pub schedule: ScheduleConfig,
    pub watcher: WatcherConfig,
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            job_name: DEFAULT_JOB_NAME.to_string(),
            storage: StorageConfig::default(),
            flow_source: FlowSourceConfig::default(),
            acquisition: AcquisitionConfig::default(),
            coordinator: CoordinatorConfig::default(),
            schedule: ScheduleConfig::default(),
            watcher: WatcherConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.job_name.is_empty() {
            return Err(ConfigError::Invalid("job_name must not be empty".into()));
        }
        self.acquisition.validate()?;
        self.coordinator.validate()?;
        self.events.validate()?;
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            node_id: "test-node".to_string(),
            storage: StorageConfig::in_memory(),
            ..Self::default()
        }
    }
}
