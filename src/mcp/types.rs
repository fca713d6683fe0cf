//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types used when talking to downstream MCP
//! servers. All types derive `Debug`, `Clone`, `Serialize`, and
//! `Deserialize`. Struct fields are `camelCase` on the wire via
//! `#[serde(rename_all = "camelCase")]` where the field is not already
//! camelCase, and `Option<>` fields omit their key from JSON when `None`.
//!
//! The capability shapes ([`Tool`], [`Resource`], [`Prompt`]) double as the
//! persisted representation in the registry: they are exactly what discovery
//! returns and what search results carry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The protocol revision this client sends in `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Earlier protocol revision retained for backwards compatibility.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";

/// All protocol versions that this client accepts during negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_2024_11_05];

// ---------------------------------------------------------------------------
// JSON-RPC method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request a page of available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Request a page of available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// Either side signals that a prior request has been abandoned.
pub const NOTIF_CANCELLED: &str = "notifications/cancelled";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// `jsonrpc` MUST always be `"2.0"`. `id` is `None` only for notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier. Present for requests, absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a valid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or the MCP spec.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Initialize handshake types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"mcphub"`).
    pub name: String,
    /// Semantic version string.
    pub version: String,
}

/// Capabilities advertised by this client in `initialize`.
///
/// MCPHub is a pure consumer of downstream servers: it advertises no
/// sampling or roots support, so the object is empty on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental, implementation-specific capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

/// Capabilities advertised by the server in its `initialize` response.
///
/// Presence of a key means the corresponding operation family is supported;
/// the descriptor payloads are opaque to this client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Server exposes `tools/list` and `tools/call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Server exposes `resources/list` and `resources/read`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Server exposes `prompts/list` and `prompts/get`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    /// Server supports log-level notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Experimental capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol revision the client speaks.
    pub protocol_version: String,
    /// Client capability advertisement.
    pub capabilities: ClientCapabilities,
    /// Client identity.
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server selected.
    pub protocol_version: String,
    /// Server capability advertisement.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: Implementation,
    /// Optional usage instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Capability shapes (discovery results, persisted by the registry)
// ---------------------------------------------------------------------------

/// A callable tool exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// Tool name (non-empty).
    pub name: String,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's arguments.
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// A readable, addressable piece of content exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Canonical resource URI (non-empty).
    pub uri: String,
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional MIME type of the content.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One argument accepted by a prompt template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A named templated message exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    /// Prompt name (non-empty).
    pub name: String,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template arguments, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// The capability triple discovered from one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilitySet {
    /// Discovered tools.
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Discovered resources.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Discovered prompts.
    #[serde(default)]
    pub prompts: Vec<Prompt>,
}

// ---------------------------------------------------------------------------
// Operation parameter / result types
// ---------------------------------------------------------------------------

/// Cursor-bearing parameters shared by the three list operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginatedParams {
    /// Opaque cursor from a previous page, if continuing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Cursor for the next page, absent or null when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Resources on this page.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Cursor for the next page, absent or null when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Prompts on this page.
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    /// Cursor for the next page, absent or null when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments matching the tool's `inputSchema`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Result of `tools/call`.
///
/// Content items are passed through untyped: the gateway forwards them to
/// its callers verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content items produced by the tool.
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    /// Whether the tool itself reported failure.
    #[serde(default)]
    pub is_error: bool,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Content items, passed through untyped.
    #[serde(default)]
    pub contents: Vec<serde_json::Value>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Name of the prompt to render.
    pub name: String,
    /// Template argument substitutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Rendered messages, passed through untyped.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}
