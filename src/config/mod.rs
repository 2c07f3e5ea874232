//! Configuration Module
//!
//! Provides TOML-based configuration for vipha with support for:
//! - HA node settings (self-managed liveness, peer addresses)
//! - Liveness session timing
//! - Local API surface and metrics
//! - Datapath queue sizing
//! - Environment variable overrides (VIPHA__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use api::ApiConfig;
pub use ha::{HaConfig, LivenessConfig};

mod api;
mod ha;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// HA node configuration
    pub ha: HaConfig,
    /// Liveness session configuration
    pub liveness: LivenessConfig,
    /// Local API surface
    pub api: ApiConfig,
    /// Datapath intake
    pub datapath: DatapathConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Datapath intake configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// Pending peer work items before submissions are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// The result is not validated; callers apply CLI overrides first and
    /// then call [`Config::validate`].
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIPHA__` prefix with double underscores for nesting:
    ///    - `VIPHA__API__BIND=0.0.0.0:11111` overrides `api.bind`
    ///    - `VIPHA__HA__SPAWN_KEEPALIVE=true` overrides `ha.spawn_keepalive`
    ///    - `VIPHA__LIVENESS__COOL_OFF=10s` overrides `liveness.cool_off`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("ha.spawn_keepalive", false)?
            .set_default("ha.interval", 0)?
            .set_default("ha.keepalive_process", "keepalived")?
            .set_default("liveness.port", 3784)?
            .set_default("liveness.multiplier", 3)?
            .set_default("liveness.instance", "default")?
            .set_default("liveness.cool_off", "35s")?
            .set_default("liveness.probe_interval", "1s")?
            .set_default("api.bind", "127.0.0.1:11111")?
            .set_default("api.metrics", true)?
            .set_default("datapath.queue_capacity", 1024)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (VIPHA__API__BIND, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("VIPHA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ha.spawn_keepalive {
            match (self.ha.remote_ip, self.ha.source_ip) {
                (Some(remote), Some(source)) => {
                    if remote == source {
                        return Err(ConfigError::Validation(
                            "ha.remote_ip and ha.source_ip must differ".to_string(),
                        ));
                    }
                }
                _ => {
                    return Err(ConfigError::Validation(
                        "ha.remote_ip and ha.source_ip are required when spawn_keepalive is set"
                            .to_string(),
                    ));
                }
            }
            if self.ha.keepalive_process.is_empty() {
                return Err(ConfigError::Validation(
                    "ha.keepalive_process must not be empty".to_string(),
                ));
            }
        }

        if self.liveness.multiplier == 0 {
            return Err(ConfigError::Validation(
                "liveness.multiplier must be at least 1".to_string(),
            ));
        }

        if self.liveness.instance.is_empty() {
            return Err(ConfigError::Validation(
                "liveness.instance must not be empty".to_string(),
            ));
        }

        if self.datapath.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "datapath.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
