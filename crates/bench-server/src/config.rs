//! Server configuration loaded from TOML

use std::path::Path;

use bench_core::{CoreError, ErrorRates};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Server configuration. Every field has a default, so an empty file works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind: String,
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Machines seen within this many minutes count toward fleet status
    pub fleet_window_minutes: i64,
    /// Error rates for SPRT tests that do not specify their own
    pub sprt: ErrorRates,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            log_filter: "info".to_string(),
            fleet_window_minutes: 5,
            sprt: ErrorRates::default(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.fleet_window_minutes <= 0 {
            return Err(CoreError::InvalidConfig(
                "fleet_window_minutes must be positive".to_string(),
            ));
        }
        let in_range = |p: f64| p > 0.0 && p < 1.0;
        if !in_range(self.sprt.alpha) || !in_range(self.sprt.beta) {
            return Err(CoreError::InvalidConfig(
                "sprt.alpha and sprt.beta must lie in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fleet_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.fleet_window_minutes)
    }
}
