//! Config and request fixtures tuned for fast tests

use aidb_config::{AdapterCommandConfig, Config, OrphanConfig, SessionConfig};
use aidb_core::Language;
use aidb_dap::ports::is_port_available;
use aidb_session::StartRequest;
use serde_json::json;

/// Short timeouts so a hung mock fails the test quickly
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        request_timeout_ms: 2_000,
        connection_timeout_ms: 2_000,
        retry_interval_ms: 10,
        max_retry_interval_ms: 100,
        initialized_event_timeout_ms: 1_000,
        event_apply_timeout_ms: 1_000,
        disconnect_timeout_ms: 500,
        ..SessionConfig::default()
    }
}

/// Config with an adapter for every language, a two-slot pool and no
/// orphan age threshold
pub fn test_config() -> Config {
    let mut config = Config {
        session: test_session_config(),
        orphan: OrphanConfig { min_age_secs: 0 },
        ..Config::default()
    }
    .with_adapter(
        Language::Python,
        AdapterCommandConfig::new("debugpy", "python")
            .arg("-m")
            .arg("debugpy.adapter")
            .arg("--port")
            .arg("{port}"),
    )
    .with_adapter(
        Language::JavaScript,
        AdapterCommandConfig::new("pwa-node", "js-debug").arg("{port}"),
    )
    .with_adapter(
        Language::Java,
        AdapterCommandConfig::new("java", "java-debug").arg("--port").arg("{port}"),
    );
    config.process.stop_timeout_ms = 500;
    config.pool.capacity = 2;
    config
}

/// `launch` request for a Python program
pub fn launch_program(program: &str) -> StartRequest {
    StartRequest::launch(json!({
        "program": program,
        "console": "internalConsole",
        "justMyCode": true
    }))
}

/// Start of a run of `size` free local ports, searching upward from 40000
pub fn free_port_range(size: u16) -> Option<u16> {
    let mut start = 40_000u16;
    while let Some(end) = start.checked_add(size) {
        if (start..end).all(is_port_available) {
            return Some(start);
        }
        start = end;
    }
    None
}
