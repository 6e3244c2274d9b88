//! MCP-specific error types.

use thiserror::Error;

/// Errors that can occur while moving bytes over a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed before the exchange completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// HTTP request failed (sse transport).
    #[error("http error: {0}")]
    Http(String),

    /// WebSocket failure (socket transport).
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The event stream never announced where to POST messages.
    #[error("event stream did not announce a message endpoint")]
    MissingEndpoint,
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Protocol negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server answered with a JSON-RPC error envelope.
    #[error("server error (code {code}): {message}")]
    Protocol { code: i64, message: String },

    /// No response arrived before the deadline.
    #[error("request '{method}' timed out after {after_ms} ms")]
    Timeout { method: String, after_ms: u64 },

    /// The server is not registered or not connected.
    #[error("unknown or disconnected server: {0}")]
    UnknownServer(String),

    /// The server is configured but disabled.
    #[error("server '{0}' is disabled")]
    Disabled(String),

    /// An inbound line could not be decoded.
    #[error("malformed message: {0}")]
    Parse(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a handshake error.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a protocol error from a JSON-RPC error object.
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(method: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Whether the error means the connection itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ConnectionClosed | TransportError::NotConnected)
        )
    }
}

impl From<McpError> for noesis_core::Error {
    fn from(e: McpError) -> Self {
        noesis_core::Error::Mcp(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownServer("notes".to_string());
        assert_eq!(err.to_string(), "unknown or disconnected server: notes");

        let err = McpError::protocol(-32601, "Method not found");
        assert_eq!(err.to_string(), "server error (code -32601): Method not found");

        let err = McpError::timeout("tools/call", std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "request 'tools/call' timed out after 1500 ms");
    }

    #[test]
    fn test_connection_loss() {
        assert!(McpError::from(TransportError::ConnectionClosed).is_connection_loss());
        assert!(!McpError::handshake("bad version").is_connection_loss());
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let err = McpError::handshake("no response");
        let core_err: noesis_core::Error = err.into();
        assert!(matches!(core_err, noesis_core::Error::Mcp(_)));
    }
}
