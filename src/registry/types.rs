//! Registry data model
//!
//! Server records and their transport configuration as persisted by
//! [`super::SqliteRegistry`] and served over the HTTP surface. Capability
//! shapes are shared with the MCP wire layer ([`crate::mcp::types`]) since
//! the registry stores exactly what discovery returns.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mcp::types::{CapabilitySet, Prompt, Resource, Tool};

/// The transport used to reach a registered MCP server.
///
/// Immutable after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdin/stdout.
    Stdio,
    /// Streamable HTTP endpoint (POST per message).
    Http,
    /// Streamable HTTP endpoint plus a long-lived SSE event stream.
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            "sse" => Ok(TransportKind::Sse),
            other => Err(format!("unknown transport type: {other}")),
        }
    }
}

/// Lifecycle status of a registered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// The last verification (or registration) succeeded.
    Active,
    /// Administratively parked.
    Inactive,
    /// The last verification failed.
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
            ServerStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(ServerStatus::Active),
            "inactive" => Ok(ServerStatus::Inactive),
            "error" => Ok(ServerStatus::Error),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

/// Transport-specific launch/connect configuration.
///
/// Serialized flat (untagged): a stdio config carries `command`/`args`/`env`,
/// a remote config carries `url`/`headers`. The variant is implied by the
/// record's [`TransportKind`]; deserialization disambiguates on the required
/// field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerConfig {
    /// Launch configuration for a stdio child process.
    Stdio {
        /// Executable to spawn (non-empty).
        command: String,
        /// Command-line arguments, in order.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables for the child.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Connect configuration for an HTTP or SSE endpoint.
    Remote {
        /// Absolute endpoint URL.
        url: url::Url,
        /// Extra headers attached to every request.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// A registered MCP server with its last discovered capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Registry-issued unique identifier (UUID string).
    pub id: String,
    /// Transport type; immutable after creation.
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Free-text description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Transport-specific configuration.
    pub config: ServerConfig,
    /// Registration timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last successful or attempted verification (UTC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// The last successfully discovered capability triple.
    pub capabilities: CapabilitySet,
}

/// One entry of a capability search result: all matches for a single server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    /// The matched server's id.
    pub server_id: String,
    /// The matched server's transport type.
    pub server_type: TransportKind,
    /// The matched server's description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_description: Option<String>,
    /// The matched server's transport configuration.
    pub server_config: ServerConfig,
    /// Tools whose name or description matched.
    #[serde(default)]
    pub matched_tools: Vec<Tool>,
    /// Resources whose name, description, or uri matched.
    #[serde(default)]
    pub matched_resources: Vec<Resource>,
    /// Prompts whose name or description matched.
    #[serde(default)]
    pub matched_prompts: Vec<Prompt>,
}

/// Which capability kinds a search should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Search tools only.
    Tool,
    /// Search resources only.
    Resource,
    /// Search prompts only.
    Prompt,
}
