//! MCPHub - registry and gateway for Model Context Protocol servers
//!
//! MCPHub lets callers register external MCP servers (stdio child
//! processes, streamable HTTP, or SSE endpoints), discovers each server's
//! tools, resources, and prompts, makes those capabilities searchable, and
//! proxies invocations through pooled long-lived sessions.
//!
//! # Architecture
//!
//! - `mcp`: the MCP client stack (wire types, JSON-RPC correlation,
//!   transports, sessions, discovery)
//! - `registry`: SQLite persistence of servers and capabilities
//! - `pool`: the connection manager keeping one live session per server
//! - `server`: the axum HTTP surface (registry CRUD, search, gateway)
//! - `config` / `cli`: configuration and command-line entry
//! - `error`: error types and result alias

pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod pool;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{McpHubError, Result};
pub use mcp::{CapabilitySet, McpSession};
pub use pool::ConnectionManager;
pub use registry::SqliteRegistry;
