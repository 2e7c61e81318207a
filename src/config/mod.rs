// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::path::PathBuf;
use config::{Config, ConfigError, Environment, File};

use crate::registry::Tier;

/// Configuration for model discovery and the llama-server binary
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Directory where GGUF model files are stored
    pub directory: PathBuf,
    /// Path to the llama-server binary used to serve each model
    pub llama_server_binary: PathBuf,
}

/// Configuration for the HTTP API server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Port pool for managed llama-server subprocesses
#[derive(Debug, Deserialize, Clone)]
pub struct PortsConfig {
    /// First port handed out to a model server
    pub range_start: u16,
    /// Last port (inclusive) handed out to a model server
    pub range_end: u16,
}

/// Per-tier inference and subprocess settings.
///
/// The timeout/retry trio governs every inference call against this tier.
/// Worst-case latency for one call is
/// `timeout_seconds + max_retries * retry_delay_seconds`; operators must
/// keep that under the timeout of whatever client issued the query, or the
/// client gives up before the orchestrator reports the failure.
#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    /// Hard timeout for a single inference attempt, in seconds
    pub timeout_seconds: f64,
    /// Number of retries after the first failed attempt
    pub max_retries: u32,
    /// Fixed delay between attempts, in seconds (linear, not exponential)
    pub retry_delay_seconds: f64,
    /// Concurrent requests admitted to this tier's server
    pub max_concurrent: usize,
    /// Context window passed to llama-server
    pub context_size: usize,
    /// Layers offloaded to the GPU
    pub gpu_layers: u32,
    /// Worker threads for the server process (server default when absent)
    pub threads: Option<usize>,
    /// Batch size passed to llama-server
    pub batch_size: usize,
    /// Whether to enable flash attention
    pub flash_attention: bool,
    /// Whether to memory-map model weights
    pub mmap: bool,
}

impl TierConfig {
    /// Worst-case wall-clock for one inference call under this policy,
    /// in seconds.
    pub fn worst_case_seconds(&self) -> f64 {
        self.timeout_seconds + self.max_retries as f64 * self.retry_delay_seconds
    }
}

/// Settings for all three inference tiers
#[derive(Debug, Deserialize, Clone)]
pub struct TiersConfig {
    pub fast: TierConfig,
    pub balanced: TierConfig,
    pub powerful: TierConfig,
}

impl TiersConfig {
    /// Returns the configuration for the given tier.
    pub fn get(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Fast => &self.fast,
            Tier::Balanced => &self.balanced,
            Tier::Powerful => &self.powerful,
        }
    }
}

/// Complexity thresholds for the query router
#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    /// Scores at or below this value classify as simple
    pub simple_max: f64,
    /// Scores at or below this value (and above simple_max) classify as moderate
    pub moderate_max: f64,
}

/// Settings for context retrieval over the local vector index
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Path to the persisted vector index file
    pub index_path: PathBuf,
    /// HTTP endpoint of the embedding server
    pub embedding_endpoint: String,
    /// Name of the embedding model the index must have been built with
    pub embedding_model: String,
    /// Maximum total token count of retrieved context per query
    pub token_budget: usize,
    /// Minimum relevance score for a chunk to be considered
    pub min_relevance: f32,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log file path
    pub file: Option<PathBuf>,
}

/// Timing for server startup and steady-state health polling
#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    /// Deadline for a spawned server to report healthy, in seconds
    pub max_startup_seconds: f64,
    /// Interval between health polls once the fleet is up, in seconds
    pub health_poll_seconds: f64,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Model discovery settings
    pub models: ModelsConfig,
    /// API server settings
    pub server: ServerConfig,
    /// Subprocess port pool
    pub ports: PortsConfig,
    /// Per-tier inference settings
    pub tiers: TiersConfig,
    /// Complexity router thresholds
    pub routing: RoutingConfig,
    /// Context retrieval settings
    pub retrieval: RetrievalConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Startup and health polling timing
    pub startup: StartupConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Creates a new Settings instance by loading config from multiple sources
    /// in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with TRIAD_
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn new() -> Result<Self, ConfigError> {
        // Check if current directory exists
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");

        // Check if config directory exists
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        // Check if default.toml exists
        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }

        // Create the local config path
        let local_config = config_dir.join("local.toml");

        // Convert paths to strings and keep them alive
        let default_config_path = default_config.to_string_lossy();
        let local_config_path = local_config.to_string_lossy();

        // Load and validate configuration
        let settings = Config::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix("TRIAD").separator("_"))
            .build()?
            .try_deserialize::<Settings>()?;

        // Validate settings after loading
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values. A failure here is fatal at startup:
    /// the system never reaches a serving state on invalid configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Create models directory if it doesn't exist
        if !self.models.directory.exists() {
            std::fs::create_dir_all(&self.models.directory).map_err(|e| {
                ConfigError::Message(format!(
                    "Failed to create models directory at {}: {}",
                    self.models.directory.display(), e
                ))
            })?;
        }

        // Validate API server port
        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Server port must be between 1 and 65535".to_string()
            ));
        }

        // Validate the subprocess port pool
        if self.ports.range_start == 0 {
            return Err(ConfigError::Message(
                "ports.range_start must be between 1 and 65535".to_string()
            ));
        }
        if self.ports.range_end < self.ports.range_start {
            return Err(ConfigError::Message(format!(
                "ports.range_end ({}) must not be below ports.range_start ({})",
                self.ports.range_end, self.ports.range_start
            )));
        }

        // The subprocess pool must not contain the API port
        if (self.ports.range_start..=self.ports.range_end).contains(&self.server.port) {
            return Err(ConfigError::Message(format!(
                "Server port {} collides with the subprocess port range {}-{}",
                self.server.port, self.ports.range_start, self.ports.range_end
            )));
        }

        // Validate routing thresholds
        if self.routing.simple_max <= 0.0 {
            return Err(ConfigError::Message(
                format!("routing.simple_max must be positive, got: {}", self.routing.simple_max)
            ));
        }
        if self.routing.moderate_max <= self.routing.simple_max {
            return Err(ConfigError::Message(format!(
                "routing.moderate_max ({}) must exceed routing.simple_max ({})",
                self.routing.moderate_max, self.routing.simple_max
            )));
        }

        // Validate retrieval settings
        if self.retrieval.token_budget == 0 {
            return Err(ConfigError::Message(
                "retrieval.token_budget must be greater than 0".to_string()
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(ConfigError::Message(format!(
                "retrieval.min_relevance must be between 0.0 and 1.0, got: {}",
                self.retrieval.min_relevance
            )));
        }

        // Validate each tier's timing policy
        for (name, tier) in [
            ("fast", &self.tiers.fast),
            ("balanced", &self.tiers.balanced),
            ("powerful", &self.tiers.powerful),
        ] {
            if tier.timeout_seconds <= 0.0 {
                return Err(ConfigError::Message(format!(
                    "tiers.{}.timeout_seconds must be positive, got: {}",
                    name, tier.timeout_seconds
                )));
            }
            if tier.retry_delay_seconds < 0.0 {
                return Err(ConfigError::Message(format!(
                    "tiers.{}.retry_delay_seconds must not be negative, got: {}",
                    name, tier.retry_delay_seconds
                )));
            }
            if tier.max_concurrent == 0 {
                return Err(ConfigError::Message(format!(
                    "tiers.{}.max_concurrent must be at least 1", name
                )));
            }
            if tier.context_size == 0 {
                return Err(ConfigError::Message(format!(
                    "tiers.{}.context_size must be greater than 0", name
                )));
            }
        }

        // Validate startup timing
        if self.startup.max_startup_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "startup.max_startup_seconds must be positive".to_string()
            ));
        }
        if self.startup.health_poll_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "startup.health_poll_seconds must be positive".to_string()
            ));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }?;

        // Create log file directory if configured and doesn't exist
        if let Some(log_file) = &self.logging.file {
            if let Some(parent) = log_file.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ConfigError::Message(format!(
                            "Failed to create log directory at {}: {}",
                            parent.display(), e
                        ))
                    })?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(timeout: f64, retries: u32, delay: f64) -> TierConfig {
        TierConfig {
            timeout_seconds: timeout,
            max_retries: retries,
            retry_delay_seconds: delay,
            max_concurrent: 1,
            context_size: 4096,
            gpu_layers: 0,
            threads: None,
            batch_size: 512,
            flash_attention: false,
            mmap: true,
        }
    }

    fn sample_settings() -> Settings {
        Settings {
            models: ModelsConfig {
                directory: std::env::temp_dir().join("triad-config-test-models"),
                llama_server_binary: PathBuf::from("llama-server"),
            },
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 8700 },
            ports: PortsConfig { range_start: 8801, range_end: 8820 },
            tiers: TiersConfig {
                fast: tier(30.0, 2, 1.0),
                balanced: tier(60.0, 2, 2.0),
                powerful: tier(120.0, 1, 5.0),
            },
            routing: RoutingConfig { simple_max: 3.0, moderate_max: 7.0 },
            retrieval: RetrievalConfig {
                index_path: PathBuf::from("index/context.json"),
                embedding_endpoint: "http://127.0.0.1:8780".to_string(),
                embedding_model: "all-MiniLM-L6-v2".to_string(),
                token_budget: 1024,
                min_relevance: 0.35,
            },
            logging: LoggingConfig { level: "info".to_string(), file: None },
            startup: StartupConfig { max_startup_seconds: 60.0, health_poll_seconds: 10.0 },
        }
    }

    #[test]
    fn valid_settings_pass_validation() {
        assert!(sample_settings().validate().is_ok());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut settings = sample_settings();
        settings.routing.moderate_max = settings.routing.simple_max;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_port_range_is_rejected() {
        let mut settings = sample_settings();
        settings.ports.range_start = 9000;
        settings.ports.range_end = 8999;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn api_port_inside_pool_is_rejected() {
        let mut settings = sample_settings();
        settings.server.port = 8805;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn worst_case_follows_linear_formula() {
        let policy = tier(5.0, 3, 2.0);
        assert_eq!(policy.worst_case_seconds(), 11.0);
    }

    #[test]
    fn out_of_range_relevance_is_rejected() {
        let mut settings = sample_settings();
        settings.retrieval.min_relevance = 1.5;
        assert!(settings.validate().is_err());
    }
}
