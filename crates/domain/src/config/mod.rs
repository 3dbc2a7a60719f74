mod collector;
mod observability;
mod server;

pub use collector::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.http_port == 0 {
            errors.push(ConfigError::error(
                "server.http_port",
                "http_port must be greater than 0",
            ));
        }
        if self.server.http_host.is_empty() {
            errors.push(ConfigError::error(
                "server.http_host",
                "http_host must not be empty",
            ));
        }
        if self.server.host == self.server.http_host && self.server.port == self.server.http_port {
            errors.push(ConfigError::error(
                "server.http_port",
                "collector and status endpoints must not share an address",
            ));
        }

        if self.collector.signal_queue == 0 {
            errors.push(ConfigError::error(
                "collector.signal_queue",
                "signal_queue must be greater than 0",
            ));
        }
        if self.collector.reload_interval_secs == 0 {
            errors.push(ConfigError::error(
                "collector.reload_interval_secs",
                "reload_interval_secs must be greater than 0",
            ));
        }
        if self.collector.max_frame_bytes < MIN_FRAME_BYTES {
            errors.push(ConfigError::error(
                "collector.max_frame_bytes",
                format!("max_frame_bytes must be at least {MIN_FRAME_BYTES}"),
            ));
        }
        if !self.collector.nodes_file.exists() {
            errors.push(ConfigError::warning(
                "collector.nodes_file",
                format!(
                    "{} does not exist; every authorize will be denied until it is created",
                    self.collector.nodes_file.display()
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}
