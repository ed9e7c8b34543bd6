//! Top-level configuration

use crate::adapter::AdapterCommandConfig;
use crate::constants::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_RETENTION_DAYS};
use crate::resources::{OrphanConfig, PoolConfig, PortConfig, ProcessConfig};
use crate::session::SessionConfig;
use aidb_core::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Complete aidb configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ports: PortConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub orphan: OrphanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Adapter command lines keyed by language name ("python", ...)
    #[serde(default)]
    pub adapters: HashMap<String, AdapterCommandConfig>,
}

impl Config {
    /// Adapter configured for `language`, if any
    pub fn adapter_for(&self, language: Language) -> Option<&AdapterCommandConfig> {
        self.adapters.get(language.as_str())
    }

    pub fn with_adapter(mut self, language: Language, adapter: AdapterCommandConfig) -> Self {
        self.adapters.insert(language.as_str().to_string(), adapter);
        self
    }

    /// Collect every validation problem instead of stopping at the first
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        self.session.validate(&mut errors);
        self.ports.validate(&mut errors);
        self.pool.validate(&mut errors);
        for (language, adapter) in &self.adapters {
            if let Err(e) = language.parse::<Language>() {
                errors.push(format!("adapters.{}: {}", language, e));
            }
            adapter.validate(language, &mut errors);
        }
        errors
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write daily-rotated log files here instead of stderr
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_retention_days() -> u64 {
    DEFAULT_LOG_RETENTION_DAYS
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            retention_days: default_retention_days(),
        }
    }
}
