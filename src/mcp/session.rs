//! Initialized MCP session over a transport
//!
//! [`McpSession`] layers the MCP lifecycle on top of a [`Transport`]:
//! it wires the transport's streams into a [`JsonRpcClient`], performs the
//! `initialize` / `notifications/initialized` handshake, and exposes the
//! six MCP operations as typed async methods.
//!
//! # Lifecycle
//!
//! [`McpSession::connect`] spawns two pump tasks (outbound writer, inbound
//! reader) plus the JSON-RPC read loop, all tied to one
//! [`CancellationToken`]. Operations fail with
//! [`McpHubError::NotInitialized`] until [`McpSession::initialize`]
//! succeeds. [`McpSession::close`] is idempotent and only tears down the
//! session layer; the owner closes the transport afterwards, strictly in
//! that order.
//!
//! # Ordering
//!
//! Writes are serialized through the outbound channel, so concurrent
//! callers interleave whole messages, never bytes. Responses correlate to
//! requests by id; per-operation deadlines are
//! [`LIST_TIMEOUT`] for the three list calls, [`CALL_TIMEOUT`] for
//! call/read/get, and [`PROBE_TIMEOUT`] for health probes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResult, ClientCapabilities, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, PaginatedParams, Prompt, ReadResourceParams, ReadResourceResult, Resource,
    Tool, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Deadline for each page of a list operation.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for tool calls, resource reads, and prompt gets.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the health probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// An MCP client session bound to one transport.
pub struct McpSession {
    client: JsonRpcClient,
    cancel: CancellationToken,
    initialized: AtomicBool,
    closed: AtomicBool,
    /// The server's initialize result, for diagnostics.
    server_info: Mutex<Option<InitializeResult>>,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl McpSession {
    /// Wire a session onto an open transport.
    ///
    /// Spawns three background tasks, all stopped by `close()`:
    ///
    /// 1. the outbound writer, forwarding serialized requests to
    ///    [`Transport::send`] in submission order;
    /// 2. the inbound reader, pumping [`Transport::receive`] into the read
    ///    loop;
    /// 3. the JSON-RPC read loop resolving pending requests.
    ///
    /// The session starts uninitialized; call [`McpSession::initialize`]
    /// before any operation.
    pub fn connect(transport: Arc<dyn Transport>) -> Self {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        let shared = Arc::new(JsonRpcClient::new(out_tx));
        start_read_loop(in_rx, cancel.clone(), Arc::clone(&shared));

        // Outbound writer: serialize-order is the channel order.
        let writer_transport = Arc::clone(&transport);
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_cancel.cancelled() => break,
                    maybe = out_rx.recv() => {
                        match maybe {
                            Some(msg) => {
                                if let Err(e) = writer_transport.send(msg).await {
                                    tracing::debug!("session writer stopping: {e}");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        // Inbound reader: transport stream -> read loop.
        let reader_transport = Arc::clone(&transport);
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut stream = reader_transport.receive();
            loop {
                tokio::select! {
                    biased;
                    _ = reader_cancel.cancelled() => break,
                    item = stream.next() => {
                        match item {
                            Some(msg) => {
                                if in_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            // Transport EOF: dropping in_tx ends the read
                            // loop, which unblocks pending callers.
                            None => break,
                        }
                    }
                }
            }
        });

        Self {
            client: shared.clone_shared(),
            cancel,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            server_info: Mutex::new(None),
        }
    }

    /// Perform the MCP `initialize` / `notifications/initialized` handshake.
    ///
    /// Sends `initialize` with this gateway's identity, verifies that the
    /// server's selected protocol version is supported, then fires the
    /// `notifications/initialized` notification.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::ProtocolVersion`] if the server picked an
    ///   unsupported revision.
    /// - [`McpHubError::Protocol`] if the server rejected the handshake.
    /// - [`McpHubError::Transport`] / [`McpHubError::Timeout`] on channel
    ///   failure or missing reply.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities: ClientCapabilities::default(),
                    client_info: Implementation {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                },
                None,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpHubError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: result.protocol_version,
            }
            .into());
        }

        // Fire-and-forget; a closed channel surfaces on the next request.
        let _ = self.client.notify(METHOD_INITIALIZED, serde_json::json!({}));

        self.initialized.store(true, Ordering::SeqCst);
        if let Ok(mut info) = self.server_info.lock() {
            *info = Some(result.clone());
        }

        Ok(result)
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpHubError::Transport("session closed".into()).into());
        }
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpHubError::NotInitialized.into())
        }
    }

    /// List all tools advertised by the server, following pagination.
    ///
    /// Issues `tools/list` requests, following `nextCursor` until the
    /// server stops returning one, and returns the accumulated list.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: ListToolsResult = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, Some(LIST_TIMEOUT))
                .await?;

            tools.extend(page.tools);

            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// List all resources advertised by the server, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_initialized()?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: ListResourcesResult = self
                .client
                .request(
                    METHOD_RESOURCES_LIST,
                    PaginatedParams { cursor },
                    Some(LIST_TIMEOUT),
                )
                .await?;

            resources.extend(page.resources);

            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(resources)
    }

    /// List all prompts advertised by the server, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized()?;
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: ListPromptsResult = self
                .client
                .request(
                    METHOD_PROMPTS_LIST,
                    PaginatedParams { cursor },
                    Some(LIST_TIMEOUT),
                )
                .await?;

            prompts.extend(page.prompts);

            match page.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(prompts)
    }

    /// Invoke a named tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                Some(CALL_TIMEOUT),
            )
            .await
    }

    /// Read the contents of a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.ensure_initialized()?;
        self.client
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                Some(CALL_TIMEOUT),
            )
            .await
    }

    /// Retrieve a rendered prompt by name, substituting template arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized()?;
        self.client
            .request(
                METHOD_PROMPTS_GET,
                GetPromptParams {
                    name: name.to_string(),
                    arguments,
                },
                Some(CALL_TIMEOUT),
            )
            .await
    }

    /// Cheap liveness probe: one unpaginated `tools/list` with a short
    /// deadline, result discarded.
    pub async fn probe(&self) -> Result<()> {
        self.ensure_initialized()?;
        let _: ListToolsResult = self
            .client
            .request(
                METHOD_TOOLS_LIST,
                PaginatedParams { cursor: None },
                Some(PROBE_TIMEOUT),
            )
            .await?;
        Ok(())
    }

    /// The server's initialize result, if the handshake completed.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().ok().and_then(|g| g.clone())
    }

    /// Tear down the session layer.
    ///
    /// Cancels the read loop and both pump tasks; pending callers unblock
    /// with a transport error. Idempotent, and safe to invoke from cleanup,
    /// explicit close, and shutdown. Does NOT close the transport; the
    /// owner does that next.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
