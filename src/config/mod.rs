/// Configuration management for rumbo
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::read_from;

/// How `set_partitions` reacts to an ambiguous master-replica snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityPolicy {
    /// Surface the ambiguity to the refresher as an error
    Fail,
    /// Log and keep routing on the previous valid snapshot
    KeepPrevious,
}

/// Routing core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Transport connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read-target policy: "upstream", "replica" or "any"
    pub read_from: String,
    /// Whether issued commands are transmitted immediately
    pub auto_flush: bool,
    /// Ambiguous-topology handling: "fail" or "keep-previous"
    pub on_ambiguous_topology: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            read_from: "upstream".to_string(),
            auto_flush: true,
            on_ambiguous_topology: "fail".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: RoutingConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if read_from::from_name(&self.read_from).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "unknown read_from policy: {}",
                self.read_from
            )));
        }

        match self.on_ambiguous_topology.as_str() {
            "fail" | "keep-previous" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown on_ambiguous_topology: {}",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn ambiguity_policy(&self) -> AmbiguityPolicy {
        match self.on_ambiguous_topology.as_str() {
            "keep-previous" => AmbiguityPolicy::KeepPrevious,
            _ => AmbiguityPolicy::Fail,
        }
    }
}
