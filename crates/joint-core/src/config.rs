//! Configuration loading and typed config structures for the joint.
//!
//! The configuration lives in `at-joint.yaml`. Every field has a default,
//! so a missing file or a partial one is fine.

use std::path::Path;

use serde::Deserialize;

use crate::debug::DEFAULT_DEBUGGER;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level joint configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JointConfig {
    /// Bus connection settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Service identity and remote-call settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Defaults for `process_tact` requests.
    #[serde(default)]
    pub tact: TactConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl JointConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `NATS_URL` overrides `infrastructure.nats_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}

/// Bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS messaging URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// First token of every subject the joint uses or serves.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl InfrastructureConfig {
    /// Override connection settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Service identity and remote-call settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Name the joint serves its operations under.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Service receiving debug events.
    #[serde(default = "default_debugger")]
    pub debugger: String,

    /// Milliseconds to wait for a remote reply before failing the call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            debugger: default_debugger(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Defaults applied to `process_tact` requests that omit a field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TactConfig {
    /// Number of tacts per request.
    #[serde(default = "default_iterate")]
    pub default_iterate: u64,

    /// Pause between tacts in milliseconds.
    #[serde(default = "default_wait_ms")]
    pub default_wait_ms: u64,
}

impl Default for TactConfig {
    fn default() -> Self {
        Self {
            default_iterate: default_iterate(),
            default_wait_ms: default_wait_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_subject_prefix() -> String {
    "at".to_owned()
}

fn default_service_name() -> String {
    "ATJoint".to_owned()
}

fn default_debugger() -> String {
    DEFAULT_DEBUGGER.to_owned()
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_iterate() -> u64 {
    1
}

const fn default_wait_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: JointConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config, JointConfig::default());
        assert_eq!(config.service.name, "ATJoint");
        assert_eq!(config.service.debugger, DEFAULT_DEBUGGER);
        assert_eq!(config.tact.default_iterate, 1);
        assert_eq!(config.tact.default_wait_ms, 1000);
        assert_eq!(config.infrastructure.subject_prefix, "at");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = "
service:
  name: JointB
  request_timeout_ms: 500
tact:
  default_wait_ms: 0
";
        let config: JointConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.service.name, "JointB");
        assert_eq!(config.service.request_timeout_ms, 500);
        assert_eq!(config.service.debugger, DEFAULT_DEBUGGER);
        assert_eq!(config.tact.default_wait_ms, 0);
        assert_eq!(config.tact.default_iterate, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let result = JointConfig::parse("service: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = JointConfig::from_file(Path::new("/nonexistent/at-joint.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
