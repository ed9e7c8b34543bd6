//! Configuration types and loading for aidb
//!
//! - `session` - timeouts, connect retry policy and channel sizes
//! - `adapter` - adapter command lines per language
//! - `resources` - port allocation, processes, project pool, orphan cleanup
//! - `constants` - defaults for every setting
//! - `paths` - the aidb home directory and derived paths
//!
//! ```rust,ignore
//! use aidb_config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("aidb.toml"))?;
//! println!("pool capacity: {}", config.pool.capacity);
//! ```

mod loader;

pub mod constants;
pub mod paths;

mod adapter;
mod resources;
mod session;
mod types;

pub use adapter::{AdapterCommandConfig, AdapterTransport};
pub use loader::{load_config, load_config_from_str, load_config_or_default, ConfigError};
pub use resources::{OrphanConfig, PoolConfig, PortConfig, ProcessConfig};
pub use session::SessionConfig;
pub use types::{Config, LoggingConfig};

pub use constants::{
    DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS, DEFAULT_TCP_KEEPALIVE_RETRIES,
    DEFAULT_TCP_KEEPALIVE_TIME_SECS, ENV_MANAGED_MARKER, ENV_SESSION_TAG, LOCALHOST_IPV4,
};
