//! MCP (Model Context Protocol) client support
//!
//! This module provides the client side of MCP: connecting to external MCP
//! servers over stdio, streamable HTTP, or SSE, and consuming their tools,
//! resources, and prompts.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC 2.0 primitives and MCP wire/capability types
//! - `client`    -- transport-agnostic request/response correlation layer
//! - `session`   -- initialize handshake and the six MCP operations
//! - `discovery` -- one-shot capability discovery for registration/verify
//! - `transport` -- `Transport` trait and concrete implementations

pub mod client;
pub mod discovery;
pub mod session;
pub mod transport;
pub mod types;

pub use session::McpSession;
pub use types::CapabilitySet;
