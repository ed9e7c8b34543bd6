//! Error types for DAP transport and adapter plumbing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Framing violations and unexpected message shapes
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON parsing and deserialization failures
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Socket and pipe I/O failures
    #[error("Adapter communication error: {0}")]
    Communication(String),

    /// `send` attempted while the transport is not connected
    #[error("Transport not connected")]
    NotConnected,

    /// Transport closed while a request was outstanding
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Request abandoned because the client is shutting down
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// Adapter answered with `success: false`
    #[error("'{command}' failed: {message}")]
    RequestFailed { command: String, message: String },

    /// Reverse request (or request variant) this client does not handle
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Subprocess spawn, signal or wait failures
    #[error("Process error: {0}")]
    Process(String),

    #[error("No free port in range {range_start}..{range_end}")]
    PortExhausted { range_start: u16, range_end: u32 },

    /// Lease registry file could not be locked, read or written
    #[error("Port registry error: {0}")]
    PortRegistry(String),
}

impl Error {
    /// True for per-frame decode failures the receive loop skips past
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::InvalidMessage(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Communication(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Protocol(format!("Invalid UTF-8: {}", err))
    }
}

impl From<Error> for aidb_core::Error {
    fn from(err: Error) -> Self {
        use aidb_core::Error as Core;
        match err {
            Error::Protocol(msg) | Error::InvalidMessage(msg) => Core::Protocol(msg),
            Error::RequestFailed { command, message } => Core::RequestRejected { command, message },
            Error::NotSupported(command) => Core::RequestRejected {
                command,
                message: "not supported".to_string(),
            },
            Error::Communication(msg) | Error::TransportClosed(msg) => Core::Connection(msg),
            Error::NotConnected => Core::Connection("transport not connected".to_string()),
            Error::Cancelled(msg) => Core::Cancelled(msg),
            Error::Timeout(ms) => Core::Timeout(ms),
            Error::Process(msg) => Core::Process(msg),
            Error::PortExhausted {
                range_start,
                range_end,
            } => Core::PortExhausted {
                range_start,
                range_end,
            },
            Error::PortRegistry(msg) => Core::Internal(format!("port registry: {}", msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RequestFailed {
            command: "evaluate".to_string(),
            message: "name 'x' is not defined".to_string(),
        };
        assert_eq!(err.to_string(), "'evaluate' failed: name 'x' is not defined");
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert!(err.is_malformed_frame());
    }

    #[test]
    fn test_transport_errors_map_to_connection() {
        let core: aidb_core::Error = Error::TransportClosed("eof".to_string()).into();
        assert_eq!(core.code(), aidb_core::ErrorCode::ConnectionFailed);
        assert!(core.is_session_broken());

        let core: aidb_core::Error = Error::Cancelled("stopping".to_string()).into();
        assert_eq!(core.code(), aidb_core::ErrorCode::RequestCancelled);
    }

    #[test]
    fn test_failed_response_is_an_invalid_request() {
        let core: aidb_core::Error = Error::RequestFailed {
            command: "variables".to_string(),
            message: "Invalid variable reference".to_string(),
        }
        .into();
        assert_eq!(core.code(), aidb_core::ErrorCode::RequestRejected);
        assert_eq!(core.category(), aidb_core::ErrorCategory::InvalidRequest);
        assert!(matches!(
            core,
            aidb_core::Error::RequestRejected { ref command, .. } if command == "variables"
        ));
    }
}
