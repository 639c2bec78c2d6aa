//! Layered configuration, following the teacher's `JackdawConfig::load`
//! precedence: defaults → `waygate.yaml` → `~/.config/waygate/waygate.yaml`
//! → `WAYGATE__`-prefixed environment variables → CLI flags (merged by
//! the caller after `load()`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_discovery_ttl_secs(),
            namespace: None,
        }
    }
}

fn default_discovery_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watcher_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_watcher_poll_secs(),
        }
    }
}

fn default_watcher_poll_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_task_concurrency")]
    pub task_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            task_concurrency: default_task_concurrency(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_task_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_schedule_poll_secs(),
        }
    }
}

fn default_schedule_poll_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_baseline_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: default_baseline_interval_secs(),
            min_samples: default_min_samples(),
            window_days: default_window_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_baseline_interval_secs() -> u64 {
    3600
}

fn default_min_samples() -> u64 {
    20
}

fn default_window_days() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// `sqlite::memory:` when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    /// Directory containing `workflows/*.yaml` and `tasks/*.yaml`,
    /// loaded once at startup into the in-memory reference registry
    /// client. `None` starts with an empty registry.
    #[serde(default)]
    pub resource_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WaygateConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub verbose: bool,
}

impl WaygateConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Defaults
    /// 2. `waygate.yaml` in the current directory
    /// 3. `~/.config/waygate/waygate.yaml`
    /// 4. `WAYGATE__`-prefixed environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_builder = config::Config::builder()
            .add_source(config::Config::try_from(&WaygateConfig::default())?)
            .add_source(
                config::File::with_name("waygate")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!(
                    "{}/.config/waygate/waygate",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .format(config::FileFormat::Yaml)
                .required(false),
            )
            .add_source(
                config::Environment::with_prefix("WAYGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        let built = config_builder.build()?;
        built.try_deserialize()
    }
}
