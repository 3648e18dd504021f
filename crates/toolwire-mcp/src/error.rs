//! Error types for the stdio MCP client.

use crate::handshake::HandshakeState;
use crate::protocol::JsonRpcError;
use std::time::Duration;
use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur while talking to a stdio MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be launched.
    #[error("Failed to spawn server '{command}': {message}")]
    Spawn { command: String, message: String },

    /// A method was issued out of handshake order.
    #[error("Cannot send '{method}' while handshake is {state}")]
    ProtocolSequence {
        method: String,
        state: HandshakeState,
    },

    /// Initialize failed, or was attempted twice.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server answered with an error payload.
    #[error("Remote error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),

    /// No matching response arrived within the bound.
    #[error("Call '{method}' (id {id}) timed out after {timeout:?}")]
    CallTimeout {
        method: String,
        id: u64,
        timeout: Duration,
    },

    /// A message could not be written to the server in time.
    #[error("Writing '{method}' timed out after {timeout:?}")]
    WriteTimeout { method: String, timeout: Duration },

    /// Discovery kept failing after every retry.
    #[error("Discovery '{method}' failed after {attempts} attempts: {source}")]
    DiscoveryFailed {
        method: String,
        attempts: u32,
        #[source]
        source: Box<McpError>,
    },

    /// The server's output stream ended or the session was stopped.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Malformed or unexpected protocol data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration could not be loaded.
    #[error("Invalid config in {path}: {message}")]
    Config { path: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a spawn error.
    pub fn spawn(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a connection closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    /// Whether a retry might succeed.
    ///
    /// Only server-side failures and timeouts qualify; everything else is
    /// either a caller bug or a dead transport.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::CallTimeout { .. })
    }

    /// The server error payload, if this is a remote error.
    pub fn remote_payload(&self) -> Option<&JsonRpcError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                McpError::spawn("python", "not found"),
                "Failed to spawn server 'python': not found",
            ),
            (
                McpError::ProtocolSequence {
                    method: "tools/list".to_string(),
                    state: HandshakeState::NotStarted,
                },
                "Cannot send 'tools/list' while handshake is not started",
            ),
            (
                McpError::Handshake("already initialized".to_string()),
                "Handshake failed: already initialized",
            ),
            (
                McpError::Remote(JsonRpcError::new(-32601, "Method not found")),
                "Remote error -32601: Method not found",
            ),
            (
                McpError::ConnectionClosed("eof".to_string()),
                "Connection closed: eof",
            ),
            (
                McpError::Protocol("invalid".to_string()),
                "Protocol error: invalid",
            ),
            (
                McpError::Config {
                    path: "toolwire.json".to_string(),
                    message: "bad".to_string(),
                },
                "Invalid config in toolwire.json: bad",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_timeout_display() {
        let err = McpError::CallTimeout {
            method: "execute_sparql".to_string(),
            id: 7,
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "Call 'execute_sparql' (id 7) timed out after 250ms"
        );
    }

    #[test]
    fn test_discovery_failed_keeps_source() {
        let err = McpError::DiscoveryFailed {
            method: "tools/list".to_string(),
            attempts: 5,
            source: Box::new(McpError::Remote(JsonRpcError::new(-32000, "not ready"))),
        };

        assert!(err.to_string().contains("after 5 attempts"));
        let source = err.source().expect("source");
        assert!(source.to_string().contains("not ready"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(McpError::Remote(JsonRpcError::new(1, "x")).is_retryable());
        assert!(McpError::CallTimeout {
            method: "m".to_string(),
            id: 1,
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!McpError::connection_closed("eof").is_retryable());
        assert!(!McpError::Handshake("x".to_string()).is_retryable());
        assert!(!McpError::spawn("x", "y").is_retryable());
        assert!(!McpError::WriteTimeout {
            method: "initialized".to_string(),
            timeout: Duration::from_millis(5),
        }
        .is_retryable());
    }

    #[test]
    fn test_remote_payload() {
        let err = McpError::Remote(JsonRpcError::new(-32602, "Invalid params"));
        assert_eq!(err.remote_payload().map(|e| e.code), Some(-32602));
        assert!(McpError::protocol_error("x").remote_payload().is_none());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let mcp_err: McpError = io_err.into();
        assert!(mcp_err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let mcp_err: McpError = json_err.into();
        assert!(mcp_err.to_string().contains("JSON error"));
    }
}
