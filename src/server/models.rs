//! HTTP request/response models for the registry and gateway surface
//!
//! Wire shapes for the `/mcp/servers/*` and `/mcp/gateway/*` endpoints.
//! Registration ingress validation lives here: transport-specific required
//! fields are enforced and cross-type fields ignored before anything
//! touches the registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{McpHubError, Result};
use crate::mcp::types::CapabilitySet;
use crate::pool::ConnectionStatus;
use crate::registry::types::{CapabilityKind, ServerConfig, ServerStatus, TransportKind};

// ---------------------------------------------------------------------------
// Registry endpoints
// ---------------------------------------------------------------------------

/// Body of `POST /mcp/servers/register`.
///
/// Flat on the wire: stdio fields and http/sse fields side by side, with
/// the `type` discriminating which set applies. Fields belonging to the
/// other transport are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterServerRequest {
    /// Transport type of the server being registered.
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Free-text description.
    pub description: Option<String>,

    // stdio fields
    /// Command to execute (stdio only).
    pub command: Option<String>,
    /// Command arguments (stdio only).
    pub args: Option<Vec<String>>,
    /// Environment variables (stdio only).
    pub env: Option<HashMap<String, String>>,

    // http/sse fields
    /// Server URL (http/sse only).
    pub url: Option<String>,
    /// HTTP headers (http/sse only).
    pub headers: Option<HashMap<String, String>>,
}

impl RegisterServerRequest {
    /// Validate and convert into the transport configuration to persist.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Validation`] when a stdio registration lacks
    /// a non-empty `command`, or an http/sse registration lacks a valid
    /// absolute `url`.
    pub fn into_parts(self) -> Result<(TransportKind, Option<String>, ServerConfig)> {
        let config = match self.kind {
            TransportKind::Stdio => {
                let command = self
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        McpHubError::Validation("command is required for stdio type".into())
                    })?
                    .to_string();
                ServerConfig::Stdio {
                    command,
                    args: self.args.unwrap_or_default(),
                    env: self.env.unwrap_or_default(),
                }
            }
            TransportKind::Http | TransportKind::Sse => {
                let raw = self
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        McpHubError::Validation("url is required for http and sse types".into())
                    })?;
                let url = url::Url::parse(raw).map_err(|e| {
                    McpHubError::Validation(format!("url is not a valid absolute URL: {e}"))
                })?;
                ServerConfig::Remote {
                    url,
                    headers: self.headers.unwrap_or_default(),
                }
            }
        };
        Ok((self.kind, self.description, config))
    }
}

/// Query parameters of `GET /mcp/servers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListServersQuery {
    /// Filter by transport type.
    pub server_type: Option<TransportKind>,
    /// Filter by lifecycle status.
    pub status: Option<ServerStatus>,
}

/// Query parameters of `GET /mcp/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    /// Keywords matched against capability names and descriptions.
    pub query: Option<String>,
    /// Narrow the search to one capability kind.
    pub capability_type: Option<CapabilityKind>,
    /// Filter by server transport type.
    pub server_type: Option<TransportKind>,
    /// Result cap; defaults to 100, bounded to [1, 1000].
    pub limit: Option<usize>,
}

/// Body of a successful `POST /mcp/servers/{id}/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// The verified server.
    pub server_id: String,
    /// Status after verification.
    pub status: ServerStatus,
    /// Human-readable outcome.
    pub message: String,
    /// Freshly discovered capabilities.
    pub capabilities: CapabilitySet,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
    /// Current UTC time.
    pub time: DateTime<Utc>,
}

/// Error body attached to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable failure description.
    pub error: String,
}

// ---------------------------------------------------------------------------
// Gateway endpoints
// ---------------------------------------------------------------------------

/// Body of `POST /mcp/gateway/{id}/tools/{name}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallRequest {
    /// Tool arguments, forwarded verbatim.
    pub arguments: Option<serde_json::Value>,
}

/// Response of `POST /mcp/gateway/{id}/tools/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    /// The invoked tool.
    pub tool: String,
    /// Content items produced by the tool.
    pub content: Vec<serde_json::Value>,
    /// Whether the tool reported failure.
    #[serde(rename = "isError")]
    pub is_error: bool,
}

/// Body of `POST /mcp/gateway/{id}/resources/read`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceReadRequest {
    /// Resource URI to read.
    pub uri: String,
}

/// Response of `POST /mcp/gateway/{id}/resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadResponse {
    /// The read URI.
    pub uri: String,
    /// Resource contents, forwarded verbatim.
    pub contents: Vec<serde_json::Value>,
}

/// Body of `POST /mcp/gateway/{id}/prompts/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptGetRequest {
    /// Prompt name.
    pub name: String,
    /// Template argument substitutions.
    pub arguments: Option<HashMap<String, String>>,
}

/// Response of `POST /mcp/gateway/{id}/prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetResponse {
    /// The rendered prompt.
    pub name: String,
    /// Prompt messages, forwarded verbatim.
    pub messages: Vec<serde_json::Value>,
}

/// Overall gateway health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayHealth {
    /// Every pool entry is connected (or none exist).
    Healthy,
    /// Some entries are connected.
    Degraded,
    /// Entries exist and none is connected.
    Unhealthy,
}

/// Response of `GET /mcp/gateway/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealthResponse {
    /// Aggregate health.
    pub status: GatewayHealth,
    /// Number of pool entries.
    pub total_connections: usize,
    /// Number of entries currently connected.
    pub active_servers: usize,
    /// Per-entry status.
    pub connections: Vec<ConnectionStatus>,
}

/// Kind discriminator for gateway SSE events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayEventKind {
    /// Stream established.
    Connected,
    /// Keep-alive probe.
    Ping,
    /// Acquire or transport failure.
    Error,
    /// Stream ending.
    Disconnected,
}

/// Payload of one gateway SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: GatewayEventKind,
    /// The server this stream proxies.
    pub server_id: String,
    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Emission time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl GatewayEvent {
    /// Build an event stamped with the current time.
    pub fn new(kind: GatewayEventKind, server_id: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            server_id: server_id.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_request(command: Option<&str>) -> RegisterServerRequest {
        RegisterServerRequest {
            kind: TransportKind::Stdio,
            description: None,
            command: command.map(str::to_string),
            args: None,
            env: None,
            url: None,
            headers: None,
        }
    }

    fn http_request(url: Option<&str>) -> RegisterServerRequest {
        RegisterServerRequest {
            kind: TransportKind::Http,
            description: None,
            command: None,
            args: None,
            env: None,
            url: url.map(str::to_string),
            headers: None,
        }
    }

    #[test]
    fn test_stdio_registration_requires_command() {
        for bad in [None, Some(""), Some("   ")] {
            let err = stdio_request(bad).into_parts().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<McpHubError>(),
                Some(McpHubError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_http_registration_requires_valid_url() {
        for bad in [None, Some(""), Some("not a url"), Some("/relative/path")] {
            let err = http_request(bad).into_parts().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<McpHubError>(),
                Some(McpHubError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_stdio_registration_ignores_remote_fields() {
        let mut req = stdio_request(Some("echo-mcp"));
        req.url = Some("http://ignored.example".to_string());
        req.args = Some(vec!["--fast".to_string()]);

        let (kind, _description, config) = req.into_parts().unwrap();
        assert_eq!(kind, TransportKind::Stdio);
        match config {
            ServerConfig::Stdio { command, args, env } => {
                assert_eq!(command, "echo-mcp");
                assert_eq!(args, vec!["--fast"]);
                assert!(env.is_empty());
            }
            other => panic!("expected stdio config, got {other:?}"),
        }
    }

    #[test]
    fn test_sse_registration_builds_remote_config() {
        let req = RegisterServerRequest {
            kind: TransportKind::Sse,
            description: Some("events".to_string()),
            command: Some("ignored".to_string()),
            args: None,
            env: None,
            url: Some("https://mcp.example/sse".to_string()),
            headers: Some(HashMap::from([(
                "Authorization".to_string(),
                "Bearer t".to_string(),
            )])),
        };

        let (kind, description, config) = req.into_parts().unwrap();
        assert_eq!(kind, TransportKind::Sse);
        assert_eq!(description.as_deref(), Some("events"));
        match config {
            ServerConfig::Remote { url, headers } => {
                assert_eq!(url.as_str(), "https://mcp.example/sse");
                assert_eq!(headers.len(), 1);
            }
            other => panic!("expected remote config, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_response_uses_is_error_key() {
        let resp = ToolCallResponse {
            tool: "echo".to_string(),
            content: vec![serde_json::json!({"type": "text", "text": "hi"})],
            is_error: false,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["isError"], false);
        assert!(json.get("is_error").is_none());
    }

    #[test]
    fn test_gateway_event_serializes_kind_as_type() {
        let event = GatewayEvent::new(GatewayEventKind::Connected, "srv", None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["server_id"], "srv");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_register_request_deserializes_from_flat_json() {
        let raw = serde_json::json!({
            "type": "stdio",
            "command": "echo-mcp",
            "args": [],
            "description": "test server"
        });
        let req: RegisterServerRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.kind, TransportKind::Stdio);
        assert_eq!(req.command.as_deref(), Some("echo-mcp"));
    }

    #[test]
    fn test_gateway_health_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(GatewayHealth::Degraded).unwrap(),
            serde_json::json!("degraded")
        );
    }
}
