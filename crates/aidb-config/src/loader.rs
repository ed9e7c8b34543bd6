//! Configuration file loading and validation
//!
//! - [`load_config`] - strict loader, errors if the file is missing
//! - [`load_config_from_str`] - parse and validate TOML text
//! - [`load_config_or_default`] - `$AIDB_CONFIG`, then `~/.aidb/aidb.toml`,
//!   then built-in defaults
//!
//! Environment overrides are applied after parsing in every case.

use crate::constants::{ENV_AIDB_CONFIG, ENV_AIDB_POOL_CAPACITY};
use crate::paths::{default_config_path, expand_tilde};
use crate::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors that can occur during config loading
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for aidb_core::Error {
    fn from(err: ConfigError) -> Self {
        aidb_core::Error::Config(err.to_string())
    }
}

/// Load configuration from a TOML file.
///
/// Does not create anything; a missing file is `ConfigError::NotFound`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let path = expand_tilde(path);
    if !path.exists() {
        return Err(ConfigError::NotFound(path));
    }

    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(&path)?;
    load_config_from_str(&content)
}

/// Load configuration from a TOML string
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the config file from the environment, falling back to defaults.
///
/// An explicitly named file (`$AIDB_CONFIG`) must exist; the default
/// location is optional.
pub fn load_config_or_default() -> Result<Config, ConfigError> {
    if let Some(path) = std::env::var_os(ENV_AIDB_CONFIG).filter(|v| !v.is_empty()) {
        return load_config(Path::new(&path));
    }

    let default_path = default_config_path();
    if default_path.exists() {
        return load_config(&default_path);
    }

    debug!("No config file found, using defaults");
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var(ENV_AIDB_POOL_CAPACITY) {
        match raw.parse::<usize>() {
            Ok(capacity) => {
                debug!(capacity, "Pool capacity overridden from environment");
                config.pool.capacity = capacity;
            }
            Err(e) => warn!(
                "Ignoring invalid {}='{}': {}",
                ENV_AIDB_POOL_CAPACITY, raw, e
            ),
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let errors = config.validation_errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdapterTransport;
    use aidb_core::Language;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_fails_on_missing_file() {
        let err = load_config(Path::new("/nonexistent/path/aidb.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.pool.capacity, 2);
        assert_eq!(config.session.request_timeout_ms, 30_000);
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aidb.toml");
        std::fs::write(
            &path,
            r#"
[session]
request_timeout_ms = 5000

[ports]
range_start = 50000
range_size = 16

[adapters.python]
adapter_id = "debugpy"
command = "python"
args = ["-m", "debugpy.adapter", "--port", "{port}"]

[adapters.javascript]
adapter_id = "pwa-node"
command = "js-debug"
transport = "stdio"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.session.request_timeout_ms, 5000);
        assert_eq!(config.ports.range_start, 50000);
        assert_eq!(config.ports.range_size, 16);

        let python = config.adapter_for(Language::Python).unwrap();
        assert_eq!(python.adapter_id, "debugpy");
        assert_eq!(python.transport, AdapterTransport::Tcp);

        let js = config.adapter_for(Language::JavaScript).unwrap();
        assert_eq!(js.transport, AdapterTransport::Stdio);
        assert!(config.adapter_for(Language::Java).is_none());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let err = load_config_from_str(
            r#"
[ports]
range_size = 0

[pool]
capacity = 0
"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ports.range_size"));
        assert!(msg.contains("pool.capacity"));
    }

    #[test]
    fn test_unknown_language_key_rejected() {
        let err = load_config_from_str(
            r#"
[adapters.cobol]
adapter_id = "cobol"
command = "cobol-dap"
transport = "stdio"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = load_config_from_str("[session\nbroken").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
