//! Logging setup for aidb
//!
//! Wraps `tracing-subscriber` so every embedding (MCP server, tests, a
//! long-running daemon) configures output the same way.
//!
//! ```rust,ignore
//! use aidb_logging::{init, init_from_config, LogConfig};
//!
//! // MCP server: stdout carries the protocol, logs go to stderr
//! init(LogConfig::mcp(false))?;
//!
//! // Driven by the [logging] section of aidb.toml
//! let _guard = init_from_config(&config.logging)?;
//! ```
//!
//! `RUST_LOG` always overrides the configured default level.

use aidb_config::LoggingConfig;
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn, Level};
pub use tracing_appender::non_blocking::WorkerGuard;

/// Daily-rotated files are named `aidb.log.YYYY-MM-DD`
pub const LOG_FILE_PREFIX: &str = "aidb.log";

/// Output destination for logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Stdout,
    /// Required whenever stdout carries a protocol
    Stderr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
}

/// Errors from logging initialization
#[derive(Debug)]
pub enum LogInitError {
    /// A global subscriber was already installed
    AlreadyInitialized(String),
    /// The log directory could not be created
    Io(std::io::Error),
}

impl std::fmt::Display for LogInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogInitError::AlreadyInitialized(e) => write!(f, "logging already initialized: {}", e),
            LogInitError::Io(e) => write!(f, "failed to prepare log directory: {}", e),
        }
    }
}

impl std::error::Error for LogInitError {}

impl From<std::io::Error> for LogInitError {
    fn from(err: std::io::Error) -> Self {
        LogInitError::Io(err)
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Force debug level regardless of `default_level` and RUST_LOG
    pub debug: bool,
    /// Level used when RUST_LOG is not set
    pub default_level: String,
    pub output: LogOutput,
    pub show_target: bool,
    pub timestamp_format: TimestampFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_level: aidb_config::constants::DEFAULT_LOG_LEVEL.to_string(),
            output: LogOutput::Stdout,
            show_target: false,
            timestamp_format: TimestampFormat::default(),
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    pub fn utc(self) -> Self {
        self.timestamp_format(TimestampFormat::Utc)
    }

    /// Interactive command-line use
    pub fn cli(debug: bool) -> Self {
        Self::new().debug(debug)
    }

    /// MCP server: stdout is reserved for JSON-RPC
    pub fn mcp(debug: bool) -> Self {
        Self::new().debug(debug).output(LogOutput::Stderr)
    }

    /// Long-running service; pair with [`init_with_file`]
    pub fn daemon(debug: bool) -> Self {
        Self::new().debug(debug).show_target(true).utc()
    }

    pub fn test() -> Self {
        Self::new().default_level("debug")
    }

    /// Build from the `[logging]` config section
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new()
            .default_level(config.level.clone())
            .output(LogOutput::Stderr)
    }

    fn build_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
        }
    }
}

macro_rules! with_timer_try_init {
    ($builder:expr, $ts_format:expr) => {{
        use tracing_subscriber::fmt::time::{LocalTime, UtcTime};
        let result = match $ts_format {
            TimestampFormat::Utc => $builder.with_timer(UtcTime::rfc_3339()).try_init(),
            TimestampFormat::Local => $builder.with_timer(LocalTime::rfc_3339()).try_init(),
        };
        result.map_err(|e| LogInitError::AlreadyInitialized(e.to_string()))
    }};
}

/// Install the global subscriber for console output.
pub fn init(config: LogConfig) -> Result<(), LogInitError> {
    let filter = config.build_filter();

    match config.output {
        LogOutput::Stdout => {
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_ansi(std::io::stdout().is_terminal());
            with_timer_try_init!(builder, config.timestamp_format)?;
        }
        LogOutput::Stderr => {
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal());
            with_timer_try_init!(builder, config.timestamp_format)?;
        }
    }
    Ok(())
}

/// Install the global subscriber writing daily-rotated files into `log_dir`.
///
/// The returned guard flushes the background writer on drop and must be
/// held for the life of the program.
pub fn init_with_file(config: LogConfig, log_dir: &Path) -> Result<WorkerGuard, LogInitError> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let builder = fmt()
        .with_env_filter(config.build_filter())
        .with_target(config.show_target)
        .with_writer(non_blocking)
        .with_ansi(false);
    with_timer_try_init!(builder, config.timestamp_format)?;

    Ok(guard)
}

/// Initialize from the `[logging]` config section.
///
/// Logs to files under `directory` when set (old files beyond the retention
/// window are removed first), otherwise to stderr.
pub fn init_from_config(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LogInitError> {
    let log_config = LogConfig::from_config(config);
    match &config.directory {
        Some(dir) => {
            let dir = aidb_config::paths::expand_tilde(dir);
            let removed = cleanup_old_logs(&dir, config.retention_days)?;
            let guard = init_with_file(log_config, &dir)?;
            if removed > 0 {
                info!(removed, "Removed expired log files");
            }
            Ok(Some(guard))
        }
        None => {
            init(log_config)?;
            Ok(None)
        }
    }
}

/// Initialize logging for tests.
///
/// Output goes through the test harness capture. Safe to call from every test.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Delete rotated `aidb.log.*` files older than `retention_days`.
///
/// A retention of 0 disables cleanup. A missing directory is not an error.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    use std::time::{Duration, SystemTime};

    if retention_days == 0 {
        return Ok(0);
    }

    let max_age = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let rotated_prefix = format!("{}.", LOG_FILE_PREFIX);
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_rotated_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(&rotated_prefix));
        if !is_rotated_log {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|modified| modified < cutoff);
        if !expired {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted expired log file");
                deleted += 1;
            }
            Err(e) => warn!(path = %path.display(), "Failed to delete log file: {}", e),
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn backdate(path: &Path, days: u64) {
        let then = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(then)).unwrap();
    }

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::mcp(false).output, LogOutput::Stderr);
        assert_eq!(LogConfig::daemon(false).timestamp_format, TimestampFormat::Utc);
        assert!(LogConfig::cli(true).debug);
    }

    #[test]
    fn test_from_config_uses_level() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        let log = LogConfig::from_config(&config);
        assert_eq!(log.default_level, "warn");
        assert_eq!(log.output, LogOutput::Stderr);
    }

    #[test]
    fn test_debug_flag_overrides_level() {
        let config = LogConfig::new().default_level("warn").debug(true);
        let filter = format!("{:?}", config.build_filter());
        assert!(filter.to_lowercase().contains("debug"), "{}", filter);
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
    }

    #[test]
    fn test_cleanup_disabled_when_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 0).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        assert_eq!(
            cleanup_old_logs(Path::new("/nonexistent/aidb/log"), 7).unwrap(),
            0
        );
    }

    #[test]
    fn test_cleanup_removes_only_expired_rotated_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("aidb.log.2026-01-01");
        let fresh = dir.path().join("aidb.log.2026-10-17");
        let unrelated = dir.path().join("ports.json");
        for p in [&old, &fresh, &unrelated] {
            File::create(p).unwrap();
        }
        backdate(&old, 10);
        backdate(&unrelated, 10);

        assert_eq!(cleanup_old_logs(dir.path(), 7).unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }
}
