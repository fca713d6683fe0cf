//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations satisfy, plus the [`open_transport`] factory that maps a
//! registered server's transport kind and configuration onto a ready
//! channel. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`http::HttpTransport`] -- streamable HTTP client transport; for SSE
//!   servers it additionally consumes a long-lived `text/event-stream`.
//! - [`fake::FakeTransport`] -- scripted in-process fake used in tests
//!   (cfg(test) only).
//!
//! # Design
//!
//! The [`Transport`] trait is intentionally minimal: callers `send` a
//! serialized JSON-RPC string and `receive` a stream of serialized JSON-RPC
//! strings (one per logical message, with an explicit end on EOF). Framing
//! is the responsibility of each concrete implementation. Inbound messages
//! are counted with a per-transport receive sequence surfaced through trace
//! logging.
//!
//! The `receive_err` stream carries transport-level diagnostics (e.g.
//! stderr output from a child process). Per the MCP spec, diagnostic output
//! MUST NOT be treated as an error condition.
//!
//! `close` is idempotent and waits for resource reclamation (child exit,
//! socket shutdown); callers own teardown ordering explicitly rather than
//! relying on drop order.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::{McpHubError, Result};
use crate::registry::types::{ServerConfig, TransportKind};

/// Per-request timeout for the HTTP transport.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so that transport
/// implementations can drive I/O without blocking the Tokio executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The string MUST be a single, complete JSON object. The transport is
    /// responsible for any framing required by the underlying medium
    /// (appending a newline for stdio, issuing an HTTP POST for streamable
    /// HTTP). Writes are never reordered.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the underlying I/O operation
    /// fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// Each item is a single, complete JSON object with leading/trailing
    /// whitespace stripped. The stream ends when the transport is closed or
    /// the remote peer disconnects; end-of-stream is distinct from a parse
    /// error (malformed frames are surfaced on `receive_err`).
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries lines written to the child
    /// process's stderr. Diagnostic output is never an error condition.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Close the channel and reclaim its resources.
    ///
    /// Idempotent: the second and later calls are no-ops. For stdio this
    /// sends a graceful termination and, after a bounded grace period,
    /// kills the child; for HTTP it terminates the remote session.
    async fn close(&self);
}

/// Open the transport appropriate for a registered server.
///
/// Returns only after the channel is ready to carry a first request: a
/// spawned child process for stdio, a constructed client for streamable
/// HTTP, and an established event stream for SSE.
///
/// # Errors
///
/// - [`McpHubError::Transport`] if the child cannot be spawned or the SSE
///   stream cannot be established.
/// - [`McpHubError::Validation`] if `config` does not match `kind` (the
///   registry never persists such a pair).
pub async fn open_transport(
    kind: TransportKind,
    config: &ServerConfig,
) -> Result<Arc<dyn Transport>> {
    match (kind, config) {
        (TransportKind::Stdio, ServerConfig::Stdio { command, args, env }) => {
            let transport = stdio::StdioTransport::spawn(command, args, env)?;
            Ok(Arc::new(transport))
        }
        (TransportKind::Http, ServerConfig::Remote { url, headers }) => {
            let transport =
                http::HttpTransport::connect(url.clone(), headers.clone(), HTTP_REQUEST_TIMEOUT);
            Ok(Arc::new(transport))
        }
        (TransportKind::Sse, ServerConfig::Remote { url, headers }) => {
            let transport =
                http::HttpTransport::connect(url.clone(), headers.clone(), HTTP_REQUEST_TIMEOUT);
            transport.open_event_stream().await?;
            Ok(Arc::new(transport))
        }
        (kind, _) => Err(McpHubError::Validation(format!(
            "configuration does not match transport type {kind}"
        ))
        .into()),
    }
}

pub mod http;
pub mod stdio;

#[cfg(test)]
pub mod fake;
