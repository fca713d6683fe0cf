//! Streamable HTTP/SSE client transport for MCP
//!
//! This module implements [`HttpTransport`]. Every outbound JSON-RPC
//! message is sent as an HTTP POST to the configured endpoint. The server
//! may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more JSON-RPC
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (used for
//!   notifications)
//!
//! For servers registered with the `sse` transport type,
//! [`HttpTransport::open_event_stream`] establishes a long-lived GET stream
//! whose `text/event-stream` events are consumed as inbound messages.
//!
//! # Session management
//!
//! After a successful `initialize` POST the server MAY return an
//! `MCP-Session-Id` response header. When present, this value is stored and
//! attached to every subsequent request. A `404` received while a session
//! is active clears the session and surfaces a transport error.
//! [`Transport::close`] issues a session-termination DELETE when a session
//! id is held.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{McpHubError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// How long the session-termination DELETE may take during `close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Streamable HTTP/SSE client transport.
#[derive(Debug)]
pub struct HttpTransport {
    /// Underlying reqwest HTTP client.
    http_client: reqwest::Client,
    /// MCP endpoint URL (POST target).
    endpoint: url::Url,
    /// Active session ID, populated from the first response that carries one.
    session_id: Arc<RwLock<Option<String>>>,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    /// Sender for inbound JSON-RPC message strings.
    response_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive()`.
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Sender for transport-level diagnostic strings.
    error_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver exposed via `receive_err()`.
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Last SSE event ID, used for stream resumption via `Last-Event-ID`.
    last_event_id: Arc<RwLock<Option<String>>>,
    /// Receive-sequence counter across all inbound paths.
    recv_seq: Arc<AtomicU64>,
    /// Latch: set once `close` has run.
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a new [`HttpTransport`] targeting `endpoint`.
    ///
    /// The `headers` map is merged into every outbound request; callers
    /// inject bearer tokens or API keys here. The `timeout` applies to each
    /// individual HTTP request. No network I/O is performed at construction
    /// time; the first POST dials the server.
    pub fn connect(endpoint: url::Url, headers: HashMap<String, String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            // SAFETY: default reqwest client construction cannot fail unless
            // TLS initialisation fails, which is a fatal startup condition on
            // any supported platform.
            .expect("failed to build reqwest client");

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            last_event_id: Arc::new(RwLock::new(None)),
            recv_seq: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a long-lived SSE GET stream and consume its events as inbound
    /// messages.
    ///
    /// Issues an HTTP GET to the endpoint with `Accept: text/event-stream`
    /// and all session headers, then spawns a background task running
    /// [`parse_sse_stream`]. Returns once the stream headers have been
    /// received, i.e. the channel is ready to carry traffic.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the GET request fails or
    /// returns a non-success status.
    pub async fn open_event_stream(&self) -> Result<()> {
        let mut req = self
            .http_client
            .get(self.endpoint.as_str())
            .header("Accept", "text/event-stream")
            .header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION);

        {
            let sid = self.session_id.read().await;
            if let Some(ref id) = *sid {
                req = req.header("MCP-Session-Id", id.as_str());
            }
        }
        {
            let lei = self.last_event_id.read().await;
            if let Some(ref id) = *lei {
                req = req.header("Last-Event-ID", id.as_str());
            }
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHubError::Transport(format!("SSE stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(
                McpHubError::Transport(format!("SSE stream returned HTTP {status}")).into(),
            );
        }

        let byte_stream = response.bytes_stream();
        let response_tx = self.response_tx.clone();
        let error_tx = self.error_tx.clone();
        let last_event_id = Arc::clone(&self.last_event_id);
        let recv_seq = Arc::clone(&self.recv_seq);

        tokio::spawn(async move {
            parse_sse_stream(byte_stream, response_tx, error_tx, last_event_id, recv_seq).await;
        });

        Ok(())
    }

    /// Push an inbound message, stamping the receive sequence.
    fn push_inbound(&self, body: String) {
        let seq = self.recv_seq.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(seq, "http transport inbound message");
        let _ = self.response_tx.send(body);
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// Send a JSON-RPC message via HTTP POST to the MCP endpoint.
    ///
    /// Mandatory headers on every POST:
    ///
    /// - `Content-Type: application/json`
    /// - `Accept: application/json, text/event-stream`
    /// - `MCP-Protocol-Version`
    /// - `MCP-Session-Id: <id>` -- only when a session is active
    /// - `Last-Event-ID: <id>` -- only when a prior SSE event id is known
    ///
    /// Response handling by status and `Content-Type`:
    ///
    /// - `202 Accepted`: no-op (notification ACK).
    /// - `404` with an active session: session cleared, transport error.
    /// - other non-2xx: transport error.
    /// - `text/event-stream`: an SSE parsing task is spawned; its events
    ///   surface on `receive()`.
    /// - anything else: body read and surfaced on `receive()`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] on connection failure, non-2xx
    /// status, or a truncated body.
    async fn send(&self, message: String) -> Result<()> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION)
            .body(message);

        {
            let sid = self.session_id.read().await;
            if let Some(ref id) = *sid {
                req = req.header("MCP-Session-Id", id.as_str());
            }
        }
        {
            let lei = self.last_event_id.read().await;
            if let Some(ref id) = *lei {
                req = req.header("Last-Event-ID", id.as_str());
            }
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHubError::Transport(format!("HTTP POST failed: {e}")))?;

        let status = response.status();

        // 404 with an active session means the session expired server-side.
        if status == reqwest::StatusCode::NOT_FOUND {
            let had_session = {
                let mut sid = self.session_id.write().await;
                sid.take().is_some()
            };
            if had_session {
                return Err(McpHubError::Transport("mcp session expired".into()).into());
            }
            return Err(McpHubError::Transport("HTTP 404 Not Found".into()).into());
        }

        // 202 Accepted = notification acknowledgement, no body expected.
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(
                McpHubError::Transport(format!("HTTP POST returned status {status}")).into(),
            );
        }

        // Capture session ID from the response header after a successful
        // request (typically set on the `initialize` response).
        if let Some(new_session_id) = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let error_tx = self.error_tx.clone();
            let last_event_id = Arc::clone(&self.last_event_id);
            let recv_seq = Arc::clone(&self.recv_seq);
            tokio::spawn(async move {
                parse_sse_stream(byte_stream, response_tx, error_tx, last_event_id, recv_seq).await;
            });
        } else {
            // application/json or any other content type: read the full body.
            let body = response.text().await.map_err(|e| {
                McpHubError::Transport(format!("failed to read response body: {e}"))
            })?;
            if !body.is_empty() {
                self.push_inbound(body);
            }
        }

        Ok(())
    }

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// Messages are delivered in the order they are received, whether from
    /// direct JSON responses or SSE events.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Returns a stream of transport-level diagnostic strings.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.error_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Terminate the remote session.
    ///
    /// If a session id is held, a DELETE with the `MCP-Session-Id` header is
    /// issued (bounded by [`CLOSE_TIMEOUT`]); failures are swallowed because
    /// the server reclaims expired sessions on its own. Only the first call
    /// acts.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let sid = {
            let mut guard = self.session_id.write().await;
            guard.take()
        };

        if let Some(sid) = sid {
            let mut req = self
                .http_client
                .delete(self.endpoint.as_str())
                .header("MCP-Session-Id", sid);
            for (k, v) in &self.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, req.send()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// SSE parser
// ---------------------------------------------------------------------------

/// Parse an SSE byte stream and forward complete `data:` events to
/// `response_tx`.
///
/// Runs inside a `tokio::spawn` and consumes the stream until it ends or
/// errors. Stream read errors are reported on `error_tx` (diagnostics), not
/// treated as protocol failures.
///
/// SSE field processing:
///
/// - `id:` -- stored in `last_event_id` for subsequent reconnect headers.
/// - `event: ping` or `data: [PING]` (case-insensitive) -- silently
///   discarded.
/// - all other `data:` values -- pushed to `response_tx` with a receive
///   sequence stamp.
/// - `retry:` -- parsed but unused (reconnect is the caller's
///   responsibility).
pub async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    response_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<String>,
    last_event_id: Arc<RwLock<Option<String>>>,
    recv_seq: Arc<AtomicU64>,
) {
    use futures::StreamExt;

    // Buffer accumulates raw bytes between `\n\n` boundaries.
    let mut buffer = String::new();

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = error_tx.send(format!("SSE stream read error: {e}"));
                break;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let _ = error_tx.send("SSE stream carried non-UTF8 chunk".to_string());
                continue;
            }
        };

        buffer.push_str(&text);

        // SSE events are separated by blank lines (`\n\n`).
        while let Some(pos) = buffer.find("\n\n") {
            let event_block = buffer[..pos].to_string();
            buffer = buffer[pos + 2..].to_string();
            process_sse_event(&event_block, &response_tx, &last_event_id, &recv_seq).await;
        }
    }

    // Process any remaining partial event in the buffer.
    if !buffer.is_empty() {
        process_sse_event(&buffer, &response_tx, &last_event_id, &recv_seq).await;
    }
}

/// Process a single SSE event block (the text between two `\n\n` delimiters).
async fn process_sse_event(
    event_block: &str,
    response_tx: &mpsc::UnboundedSender<String>,
    last_event_id: &Arc<RwLock<Option<String>>>,
    recv_seq: &Arc<AtomicU64>,
) {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;
    let mut event_id: Option<&str> = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if line.starts_with("retry:") {
            // Ignored: reconnect timing is the caller's responsibility.
        }
        // Lines starting with `:` are SSE comments; all others are ignored.
    }

    // Store event ID for SSE resumption.
    if let Some(id) = event_id {
        let mut guard = last_event_id.write().await;
        *guard = Some(id.to_string());
    }

    // Discard keep-alive ping events.
    if let Some(et) = event_type {
        if et.eq_ignore_ascii_case("ping") {
            return;
        }
    }

    // Join multi-line data values.
    let data = data_lines.join("\n");

    if data.eq_ignore_ascii_case("[ping]") || data.is_empty() {
        return;
    }

    let seq = recv_seq.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::trace!(seq, "sse transport inbound message");
    let _ = response_tx.send(data);
}
