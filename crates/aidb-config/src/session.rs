//! Session and DAP connection configuration
//!
//! Timeouts, connect retry policy and channel sizes used by a live session.

use crate::constants::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_DISCONNECT_TIMEOUT_MS, DEFAULT_EVENT_APPLY_TIMEOUT_MS,
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_INITIALIZED_EVENT_TIMEOUT_MS,
    DEFAULT_LISTENER_CHANNEL_CAPACITY, DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS,
    DEFAULT_MAX_RETRY_INTERVAL_MS, DEFAULT_MAX_SESSIONS, DEFAULT_OUTPUT_HISTORY_LINES,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Debug session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timeout for every correlated DAP request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Overall budget for connecting to the adapter socket
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Initial connect retry delay, doubled on each attempt
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    /// Fast-fail after this many consecutive "connection refused"
    #[serde(default = "default_max_connection_refused_attempts")]
    pub max_connection_refused_attempts: u32,
    /// Capacity of raw DAP event subscriptions
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Capacity of the broadcast channel for external listeners
    #[serde(default = "default_listener_channel_capacity")]
    pub listener_channel_capacity: usize,
    /// How long the handshake waits for the `initialized` event
    #[serde(default = "default_initialized_event_timeout_ms")]
    pub initialized_event_timeout_ms: u64,
    /// How long a caller waits for queued events to be applied
    #[serde(default = "default_event_apply_timeout_ms")]
    pub event_apply_timeout_ms: u64,
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    /// Output lines kept per session for status reports
    #[serde(default = "default_output_history_lines")]
    pub output_history_lines: usize,
    /// Registry capacity
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_connection_timeout_ms() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_max_retry_interval_ms() -> u64 {
    DEFAULT_MAX_RETRY_INTERVAL_MS
}

fn default_max_connection_refused_attempts() -> u32 {
    DEFAULT_MAX_CONNECTION_REFUSED_ATTEMPTS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_listener_channel_capacity() -> usize {
    DEFAULT_LISTENER_CHANNEL_CAPACITY
}

fn default_initialized_event_timeout_ms() -> u64 {
    DEFAULT_INITIALIZED_EVENT_TIMEOUT_MS
}

fn default_event_apply_timeout_ms() -> u64 {
    DEFAULT_EVENT_APPLY_TIMEOUT_MS
}

fn default_disconnect_timeout_ms() -> u64 {
    DEFAULT_DISCONNECT_TIMEOUT_MS
}

fn default_output_history_lines() -> usize {
    DEFAULT_OUTPUT_HISTORY_LINES
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            max_connection_refused_attempts: default_max_connection_refused_attempts(),
            event_channel_capacity: default_event_channel_capacity(),
            listener_channel_capacity: default_listener_channel_capacity(),
            initialized_event_timeout_ms: default_initialized_event_timeout_ms(),
            event_apply_timeout_ms: default_event_apply_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            output_history_lines: default_output_history_lines(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn initialized_event_timeout(&self) -> Duration {
        Duration::from_millis(self.initialized_event_timeout_ms)
    }

    pub fn event_apply_timeout(&self) -> Duration {
        Duration::from_millis(self.event_apply_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Set the per-request timeout (used heavily by tests)
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.request_timeout_ms == 0 {
            errors.push("session.request_timeout_ms must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            errors.push("session.event_channel_capacity must be greater than 0".to_string());
        }
        if self.listener_channel_capacity == 0 {
            errors.push("session.listener_channel_capacity must be greater than 0".to_string());
        }
        if self.max_sessions == 0 {
            errors.push("session.max_sessions must be greater than 0".to_string());
        }
        if self.retry_interval_ms > self.max_retry_interval_ms {
            errors.push(
                "session.retry_interval_ms must not exceed session.max_retry_interval_ms"
                    .to_string(),
            );
        }
    }
}
