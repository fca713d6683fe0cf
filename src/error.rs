//! Error types for MCPHub
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling. The gateway layer is the
//! only place these kinds are translated into HTTP status codes; everywhere
//! else they cross component boundaries as values.

use thiserror::Error;

/// Main error type for MCPHub operations
///
/// This enum encompasses all possible errors that can occur during server
/// registration, capability discovery, session management, and gateway
/// proxying.
#[derive(Error, Debug)]
pub enum McpHubError {
    /// Input failed schema or range validation; not retryable
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown server id or unknown capability
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration id
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport-level I/O failure: cannot spawn, cannot dial, unexpected EOF
    #[error("Transport error: {0}")]
    Transport(String),

    /// MCP JSON-RPC error reply or malformed reply
    #[error("Protocol error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code
        code: i64,
        /// Human-readable error description
        message: String,
    },

    /// Protocol version negotiation failure
    #[error("Protocol version mismatch: expected one of {expected:?}, got {got}")]
    ProtocolVersion {
        /// List of accepted versions
        expected: Vec<String>,
        /// Version the server returned
        got: String,
    },

    /// Operation attempted before the initialize handshake completed
    #[error("Session not initialized")]
    NotInitialized,

    /// Deadline exceeded waiting for a reply
    #[error("Timeout waiting for reply to {method}")]
    Timeout {
        /// JSON-RPC method that timed out
        method: String,
    },

    /// Caller-initiated abort
    #[error("Operation cancelled")]
    Cancelled,

    /// The manager could not acquire a usable session
    #[error("Connect error: {0}")]
    Connect(String),

    /// Registry persistence errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for MCPHub operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = McpHubError::Validation("command is required for stdio type".to_string());
        assert_eq!(
            error.to_string(),
            "Validation error: command is required for stdio type"
        );
    }

    #[test]
    fn test_not_found_error_display() {
        let error = McpHubError::NotFound("server abc".to_string());
        assert_eq!(error.to_string(), "Not found: server abc");
    }

    #[test]
    fn test_conflict_error_display() {
        let error = McpHubError::Conflict("duplicate server id".to_string());
        assert_eq!(error.to_string(), "Conflict: duplicate server id");
    }

    #[test]
    fn test_transport_error_display() {
        let error = McpHubError::Transport("connection reset".to_string());
        assert_eq!(error.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_protocol_error_display() {
        let error = McpHubError::Protocol {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(error.to_string(), "Protocol error -32601: Method not found");
    }

    #[test]
    fn test_protocol_version_error_display() {
        let error = McpHubError::ProtocolVersion {
            expected: vec!["2025-03-26".to_string()],
            got: "1999-01-01".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("2025-03-26"));
        assert!(msg.contains("1999-01-01"));
    }

    #[test]
    fn test_timeout_error_display() {
        let error = McpHubError::Timeout {
            method: "tools/list".to_string(),
        };
        assert!(error.to_string().contains("tools/list"));
    }

    #[test]
    fn test_not_initialized_error_display() {
        let error = McpHubError::NotInitialized;
        assert_eq!(error.to_string(), "Session not initialized");
    }

    #[test]
    fn test_cancelled_error_display() {
        let error = McpHubError::Cancelled;
        assert_eq!(error.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_connect_error_display() {
        let error = McpHubError::Connect("failed to open session".to_string());
        assert_eq!(error.to_string(), "Connect error: failed to open session");
    }

    #[test]
    fn test_storage_error_display() {
        let error = McpHubError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: McpHubError = io_error.into();
        assert!(matches!(error, McpHubError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_str = "{invalid json}";
        let json_error = serde_json::from_str::<serde_json::Value>(json_str).unwrap_err();
        let error: McpHubError = json_error.into();
        assert!(matches!(error, McpHubError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_str = "invalid: : yaml";
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let error: McpHubError = yaml_error.into();
        assert!(matches!(error, McpHubError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpHubError>();
    }

    #[test]
    fn test_error_propagation() {
        fn failing_function() -> crate::error::Result<()> {
            Err(anyhow::anyhow!(McpHubError::Cancelled))
        }

        let result = failing_function();
        assert!(result.is_err());
    }
}
