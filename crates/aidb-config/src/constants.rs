//! Default values for every configuration setting.
//!
//! Config structs reference these through `#[serde(default = ...)]`
//! functions so a partial TOML file always yields a complete config.

// ============================================================================
// NETWORK
// ============================================================================

/// Loopback address used for adapter connections and port probes
pub const LOCALHOST_IPV4: std::net::Ipv4Addr = std::net::Ipv4Addr::new(127, 0, 0, 1);

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

/// Overrides the aidb home directory (default `~/.aidb`)
pub const ENV_AIDB_HOME: &str = "AIDB_HOME";

/// Path of the config file to load
pub const ENV_AIDB_CONFIG: &str = "AIDB_CONFIG";

/// Overrides `pool.capacity`
pub const ENV_AIDB_POOL_CAPACITY: &str = "AIDB_POOL_CAPACITY";

/// Set on every adapter subprocess; value is the owning session or pool id
pub const ENV_SESSION_TAG: &str = "AIDB_SESSION_TAG";

/// Set to "1" on every subprocess started by the process manager
pub const ENV_MANAGED_MARKER: &str = "AIDB_MANAGED";

// ============================================================================
// SESSION / DAP
// ============================================================================

/// Per-request timeout for correlated DAP requests
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Overall budget for connecting to an adapter socket
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// First retry delay when the adapter is not listening yet
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Upper bound for the exponential connect backoff
pub const DEFAULT_MAX_RETRY_INTERVAL_MS: u64 = 2_000;

/// Consecutive "connection refused" results before giving up early
pub const DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS: u32 = 25;

/// Bounded capacity of raw DAP event subscriptions
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the broadcast channel external listeners subscribe to
pub const DEFAULT_LISTENER_CHANNEL_CAPACITY: usize = 1_024;

/// How long the handshake waits for the `initialized` event
pub const DEFAULT_INITIALIZED_EVENT_TIMEOUT_MS: u64 = 5_000;

/// How long a caller waits for the event bridge to catch up to a response
pub const DEFAULT_EVENT_APPLY_TIMEOUT_MS: u64 = 1_000;

/// Timeout for the `disconnect` request sent while stopping a session
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u64 = 2_000;

/// Output lines kept per session
pub const DEFAULT_OUTPUT_HISTORY_LINES: usize = 500;

/// Maximum number of live sessions (parents and children)
pub const DEFAULT_MAX_SESSIONS: usize = 32;

// ============================================================================
// TCP KEEPALIVE
// ============================================================================

pub const DEFAULT_TCP_KEEPALIVE_TIME_SECS: u64 = 10;

pub const DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS: u64 = 10;

/// Not supported on Windows/macOS
pub const DEFAULT_TCP_KEEPALIVE_RETRIES: u32 = 3;

// ============================================================================
// PORT ALLOCATION
// ============================================================================

pub const DEFAULT_PORT_RANGE_START: u16 = 42_000;

pub const DEFAULT_PORT_RANGE_SIZE: u16 = 1_000;

/// Dead-holder leases younger than this are left alone
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 30;

/// Bind probes per allocation before reporting exhaustion
pub const DEFAULT_MAX_PROBE_ATTEMPTS: u32 = 100;

/// Bound on waiting for the registry file lock
pub const DEFAULT_REGISTRY_LOCK_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_PORT_REGISTRY_FILENAME: &str = "ports.json";

// ============================================================================
// PROCESSES
// ============================================================================

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_PROCESS_STOP_TIMEOUT_MS: u64 = 5_000;

/// Bytes of stdout/stderr kept per stream
pub const DEFAULT_OUTPUT_BUFFER_BYTES: usize = 64 * 1024;

// ============================================================================
// PROJECT POOL
// ============================================================================

pub const DEFAULT_POOL_CAPACITY: usize = 2;

pub const DEFAULT_BRIDGE_STOP_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// ORPHAN CLEANUP
// ============================================================================

/// Tagged processes younger than this are never treated as orphans
pub const DEFAULT_ORPHAN_MIN_AGE_SECS: u64 = 60;

// ============================================================================
// LOGGING
// ============================================================================

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
