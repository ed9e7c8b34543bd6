//! Error types for aidb sessions

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Error Codes - Machine-readable codes for API consumers
// ============================================================================

/// Machine-readable error codes for API consumers.
///
/// Error code ranges:
/// - 1xxx: Request errors (the call was invalid, session intact)
/// - 2xxx: Session errors (adapter or session is broken)
/// - 3xxx: Config errors
/// - 4xxx: Connection errors
/// - 5xxx: Infrastructure errors (processes, ports, registry)
/// - 9xxx: Generic errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
pub enum ErrorCode {
    // Request errors (1xxx)
    /// Operation not valid in the current session state (1001)
    InvalidState = 1001,
    /// Adapter did not advertise a required capability (1002)
    CapabilityUnsupported = 1002,
    /// Another execution-control request is in flight (1003)
    SessionBusy = 1003,
    /// Unknown session id (1004)
    SessionNotFound = 1004,
    /// Expression could not be evaluated (1005)
    EvaluationFailed = 1005,
    /// Adapter answered the request with `success: false` (1006)
    RequestRejected = 1006,

    // Session errors (2xxx)
    /// Malformed or unexpected DAP traffic (2001)
    ProtocolViolation = 2001,
    /// Request cancelled because the session is stopping (2002)
    RequestCancelled = 2002,

    // Config errors (3xxx)
    /// Invalid configuration (3001)
    ConfigInvalid = 3001,

    // Connection errors (4xxx)
    /// Transport failure or disconnect (4001)
    ConnectionFailed = 4001,
    /// Request timed out (4002)
    RequestTimeout = 4002,

    // Infrastructure errors (5xxx)
    /// Adapter process failure (5001)
    ProcessFailed = 5001,
    /// No free port in the configured range (5002)
    PortExhausted = 5002,
    /// Session registry at capacity (5003)
    RegistryFull = 5003,

    // Generic (9xxx)
    /// Internal error (9001)
    InternalError = 9001,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

// ============================================================================
// Error Categories - What the caller should do next
// ============================================================================

/// Error categorization for callers.
///
/// Separates "your request was invalid" from "the session is broken, restart
/// it" from "try again shortly".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request was invalid; the session is unaffected
    InvalidRequest,
    /// The adapter or session is broken and should be restarted
    SessionBroken,
    /// Temporary condition, safe to retry
    Retryable,
    /// Bug or unexpected condition
    Internal,
}

impl ErrorCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::SessionBroken => "session_broken",
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::Internal => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Retryable)
    }
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidState
            | ErrorCode::CapabilityUnsupported
            | ErrorCode::SessionNotFound
            | ErrorCode::EvaluationFailed
            | ErrorCode::RequestRejected
            | ErrorCode::ConfigInvalid => ErrorCategory::InvalidRequest,

            ErrorCode::ProtocolViolation
            | ErrorCode::RequestCancelled
            | ErrorCode::ConnectionFailed
            | ErrorCode::ProcessFailed => ErrorCategory::SessionBroken,

            ErrorCode::SessionBusy
            | ErrorCode::RequestTimeout
            | ErrorCode::PortExhausted
            | ErrorCode::RegistryFull => ErrorCategory::Retryable,

            ErrorCode::InternalError => ErrorCategory::Internal,
        }
    }

    /// Get the error code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::CapabilityUnsupported => "CAPABILITY_UNSUPPORTED",
            ErrorCode::SessionBusy => "SESSION_BUSY",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::EvaluationFailed => "EVALUATION_FAILED",
            ErrorCode::RequestRejected => "REQUEST_REJECTED",
            ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorCode::RequestCancelled => "REQUEST_CANCELLED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::ProcessFailed => "PROCESS_FAILED",
            ErrorCode::PortExhausted => "PORT_EXHAUSTED",
            ErrorCode::RegistryFull => "REGISTRY_FULL",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport-level failure: connect refused, EOF, write error, disconnect
    /// while a request was outstanding.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The adapter sent something we could not make sense of
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The adapter refused a request (bad reference, unknown thread, ...).
    /// The session itself is still usable.
    #[error("Adapter rejected '{command}': {message}")]
    RequestRejected { command: String, message: String },

    #[error("Adapter does not support {feature} (missing capability '{capability}')")]
    CapabilityUnsupported { capability: String, feature: String },

    /// Operation attempted in a state that does not allow it. Covers the
    /// "not ready" case before the adapter is initialized.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("Session busy: {0} already in progress")]
    Busy(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("No free port in range {range_start}..{range_end}")]
    PortExhausted { range_start: u16, range_end: u32 },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session registry full ({0} sessions)")]
    RegistryFull(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_state(operation: impl Into<String>, state: impl ToString) -> Self {
        Error::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    pub fn unsupported(capability: impl Into<String>, feature: impl Into<String>) -> Self {
        Error::CapabilityUnsupported {
            capability: capability.into(),
            feature: feature.into(),
        }
    }

    /// Get the machine-readable error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidState { .. } => ErrorCode::InvalidState,
            Error::CapabilityUnsupported { .. } => ErrorCode::CapabilityUnsupported,
            Error::Busy(_) => ErrorCode::SessionBusy,
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::Evaluation(_) => ErrorCode::EvaluationFailed,
            Error::Protocol(_) => ErrorCode::ProtocolViolation,
            Error::RequestRejected { .. } => ErrorCode::RequestRejected,
            Error::Cancelled(_) => ErrorCode::RequestCancelled,
            Error::Config(_) => ErrorCode::ConfigInvalid,
            Error::Connection(_) => ErrorCode::ConnectionFailed,
            Error::Timeout(_) => ErrorCode::RequestTimeout,
            Error::Process(_) => ErrorCode::ProcessFailed,
            Error::PortExhausted { .. } => ErrorCode::PortExhausted,
            Error::RegistryFull(_) => ErrorCode::RegistryFull,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the error code name (e.g., "SESSION_BUSY")
    pub fn code_name(&self) -> &'static str {
        self.code().name()
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// True when the session that produced this error should be restarted.
    pub fn is_session_broken(&self) -> bool {
        self.category() == ErrorCategory::SessionBroken
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<crate::ParseLanguageError> for Error {
    fn from(err: crate::ParseLanguageError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("continue", "running");
        assert_eq!(err.to_string(), "Cannot continue while session is running");
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert_eq!(err.code().as_u16(), 1001);
        assert_eq!(err.code_name(), "INVALID_STATE");
    }

    #[test]
    fn test_capability_unsupported_is_invalid_request() {
        let err = Error::unsupported("supportsLogPoints", "logpoints");
        assert!(err.to_string().contains("supportsLogPoints"));
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
        assert!(!err.is_session_broken());
    }

    #[test]
    fn test_connection_error_breaks_session() {
        let err = Error::Connection("adapter disconnected".to_string());
        assert_eq!(err.category(), ErrorCategory::SessionBroken);
        assert!(err.is_session_broken());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejected_request_leaves_session_intact() {
        let err = Error::RequestRejected {
            command: "variables".to_string(),
            message: "Invalid variable reference".to_string(),
        };
        assert_eq!(err.code().as_u16(), 1006);
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
        assert!(!err.is_session_broken());
        assert_eq!(
            err.to_string(),
            "Adapter rejected 'variables': Invalid variable reference"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::Busy("continue".to_string()).is_retryable());
        assert!(Error::Timeout(1000).is_retryable());
        assert!(Error::PortExhausted {
            range_start: 40000,
            range_end: 40010
        }
        .is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::PortExhausted).unwrap();
        assert_eq!(json, "5002");
    }

    #[test]
    fn test_error_category_serialization() {
        let json = serde_json::to_string(&ErrorCategory::SessionBroken).unwrap();
        assert_eq!(json, "\"session_broken\"");
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    }
}
