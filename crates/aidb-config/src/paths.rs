//! Path utilities for aidb
//!
//! Everything aidb persists lives under one home directory: `~/.aidb` by
//! default, or `$AIDB_HOME` when set.

use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_PORT_REGISTRY_FILENAME, ENV_AIDB_HOME};

/// Default aidb data directory name
pub const AIDB_DIR_NAME: &str = ".aidb";

/// Default log subdirectory name
pub const LOG_DIR_NAME: &str = "log";

/// Default config filename
pub const DEFAULT_CONFIG_FILENAME: &str = "aidb.toml";

/// Get the aidb home directory.
///
/// `$AIDB_HOME` wins; otherwise `~/.aidb`, falling back to `./.aidb` when no
/// home directory can be determined.
pub fn aidb_home() -> PathBuf {
    if let Some(home) = std::env::var_os(ENV_AIDB_HOME).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(AIDB_DIR_NAME)
}

/// Shared port lease registry (`~/.aidb/ports.json`)
pub fn default_port_registry_path() -> PathBuf {
    aidb_home().join(DEFAULT_PORT_REGISTRY_FILENAME)
}

pub fn default_log_dir() -> PathBuf {
    aidb_home().join(LOG_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    aidb_home().join(DEFAULT_CONFIG_FILENAME)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Create the parent directory of `path` if it does not exist.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
