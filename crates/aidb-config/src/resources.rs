//! Shared-resource configuration: ports, processes, the project pool and
//! orphan cleanup.

use crate::constants::{
    DEFAULT_BRIDGE_STOP_TIMEOUT_MS, DEFAULT_LEASE_GRACE_SECS, DEFAULT_MAX_PROBE_ATTEMPTS,
    DEFAULT_ORPHAN_MIN_AGE_SECS, DEFAULT_OUTPUT_BUFFER_BYTES, DEFAULT_POOL_CAPACITY,
    DEFAULT_PORT_RANGE_SIZE, DEFAULT_PORT_RANGE_START, DEFAULT_PROCESS_STOP_TIMEOUT_MS,
    DEFAULT_REGISTRY_LOCK_TIMEOUT_MS,
};
use crate::paths::{default_port_registry_path, expand_tilde};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Port allocation
// ============================================================================

/// Cross-process port allocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_range_start")]
    pub range_start: u16,
    #[serde(default = "default_range_size")]
    pub range_size: u16,
    /// Shared lease registry; `None` means `~/.aidb/ports.json`
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Leases of dead holders become reclaimable after this many seconds
    #[serde(default = "default_lease_grace_secs")]
    pub lease_grace_secs: u64,
    #[serde(default = "default_max_probe_attempts")]
    pub max_probe_attempts: u32,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_range_start() -> u16 {
    DEFAULT_PORT_RANGE_START
}

fn default_range_size() -> u16 {
    DEFAULT_PORT_RANGE_SIZE
}

fn default_lease_grace_secs() -> u64 {
    DEFAULT_LEASE_GRACE_SECS
}

fn default_max_probe_attempts() -> u32 {
    DEFAULT_MAX_PROBE_ATTEMPTS
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_REGISTRY_LOCK_TIMEOUT_MS
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_size: default_range_size(),
            registry_path: None,
            lease_grace_secs: default_lease_grace_secs(),
            max_probe_attempts: default_max_probe_attempts(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl PortConfig {
    /// Resolved registry file path
    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(default_port_registry_path)
    }

    pub fn lease_grace(&self) -> Duration {
        Duration::from_secs(self.lease_grace_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.range_size == 0 {
            errors.push("ports.range_size must be greater than 0".to_string());
        }
        if self.range_start == 0 {
            errors.push("ports.range_start must be greater than 0".to_string());
        }
        if u32::from(self.range_start) + u32::from(self.range_size) > u32::from(u16::MAX) + 1 {
            errors.push("ports.range_start + ports.range_size exceeds 65536".to_string());
        }
        if self.max_probe_attempts == 0 {
            errors.push("ports.max_probe_attempts must be greater than 0".to_string());
        }
    }
}

// ============================================================================
// Processes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Wait between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Bytes of stdout/stderr retained per stream
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_PROCESS_STOP_TIMEOUT_MS
}

fn default_output_buffer_bytes() -> usize {
    DEFAULT_OUTPUT_BUFFER_BYTES
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            output_buffer_bytes: default_output_buffer_bytes(),
        }
    }
}

impl ProcessConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

// ============================================================================
// Project pool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live project bridges
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,
    #[serde(default = "default_bridge_stop_timeout_ms")]
    pub bridge_stop_timeout_ms: u64,
    /// Command used to start a project bridge. `{project}` and `{name}` are
    /// substituted, and `{port}` gets a leased port the bridge must serve DAP
    /// on. No pool bridges can be started when unset.
    #[serde(default)]
    pub bridge_command: Option<Vec<String>>,
}

fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

fn default_bridge_stop_timeout_ms() -> u64 {
    DEFAULT_BRIDGE_STOP_TIMEOUT_MS
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
            bridge_stop_timeout_ms: default_bridge_stop_timeout_ms(),
            bridge_command: None,
        }
    }
}

impl PoolConfig {
    pub fn bridge_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_stop_timeout_ms)
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.capacity == 0 {
            errors.push("pool.capacity must be greater than 0".to_string());
        }
        if let Some(cmd) = &self.bridge_command {
            if cmd.is_empty() {
                errors.push("pool.bridge_command must not be empty when set".to_string());
            } else if !cmd.iter().any(|arg| arg.contains("{port}")) {
                errors.push("pool.bridge_command must pass {port} to the bridge".to_string());
            }
        }
    }
}

// ============================================================================
// Orphan cleanup
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanConfig {
    /// Minimum process age before a tagged process may be terminated
    #[serde(default = "default_orphan_min_age_secs")]
    pub min_age_secs: u64,
}

fn default_orphan_min_age_secs() -> u64 {
    DEFAULT_ORPHAN_MIN_AGE_SECS
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            min_age_secs: default_orphan_min_age_secs(),
        }
    }
}

impl OrphanConfig {
    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range_overflow_rejected() {
        let config = PortConfig {
            range_start: 65_000,
            range_size: 1_000,
            ..PortConfig::default()
        };
        let mut errors = Vec::new();
        config.validate(&mut errors);
        assert!(errors.iter().any(|e| e.contains("exceeds")));
    }

    #[test]
    fn test_registry_path_defaults_to_home() {
        let config = PortConfig::default();
        assert!(config.registry_path().ends_with("ports.json"));
    }

    #[test]
    fn test_explicit_registry_path_kept() {
        let config = PortConfig {
            registry_path: Some(PathBuf::from("/tmp/aidb-test/ports.json")),
            ..PortConfig::default()
        };
        assert_eq!(
            config.registry_path(),
            PathBuf::from("/tmp/aidb-test/ports.json")
        );
    }

    #[test]
    fn test_zero_pool_capacity_rejected() {
        let config = PoolConfig {
            capacity: 0,
            ..PoolConfig::default()
        };
        let mut errors = Vec::new();
        config.validate(&mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_bridge_command_must_carry_port() {
        let mut config = PoolConfig {
            bridge_command: Some(vec!["aidb-bridge".to_string(), "{project}".to_string()]),
            ..PoolConfig::default()
        };
        let mut errors = Vec::new();
        config.validate(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("{port}"));

        config.bridge_command = Some(vec!["aidb-bridge".to_string(), "--port={port}".to_string()]);
        let mut errors = Vec::new();
        config.validate(&mut errors);
        assert!(errors.is_empty(), "{:?}", errors);
    }
}
