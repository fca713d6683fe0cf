//! Transport-agnostic async JSON-RPC 2.0 correlation layer
//!
//! This module provides [`JsonRpcClient`], a channel-backed JSON-RPC 2.0
//! client that is completely decoupled from the underlying transport.
//! Callers wire up two [`tokio::sync::mpsc`] channels (one for outbound
//! serialized messages, one for inbound serialized messages) and then call
//! [`start_read_loop`] to process replies concurrently.
//!
//! # Design
//!
//! - Outbound messages are written to `outbound_tx` as newline-free JSON
//!   strings. The transport layer is responsible for framing (newline-
//!   delimited for stdio, HTTP POST for streamable HTTP).
//! - In-flight requests are tracked in a `pending` map keyed by `u64`
//!   request ID. Each entry is a [`oneshot::Sender`] resolved with the
//!   `result` or `error` value when the matching response arrives.
//! - Server-sent notifications are routed to a diagnostic sink (trace
//!   logging); server-initiated requests are answered with JSON-RPC
//!   `-32601` since the gateway does not act as an MCP host.
//! - A request abandoned after dispatch (caller cancelled, or its deadline
//!   fired) reaps its pending slot and emits a `notifications/cancelled`
//!   notification carrying the request ID. The downstream server may still
//!   finish the work; its late reply is discarded.
//! - A [`CancellationToken`] stops the read loop cleanly and drops all
//!   pending senders so that awaiting callers receive an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, NOTIF_CANCELLED};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// Create one with [`JsonRpcClient::new`], passing the outbound channel
/// sender, then call [`start_read_loop`] with the inbound receiver. Issue
/// requests with [`JsonRpcClient::request`] and fire-and-forget
/// notifications with [`JsonRpcClient::notify`].
pub struct JsonRpcClient {
    /// Monotonically increasing request ID counter.
    next_id: Arc<AtomicU64>,
    /// In-flight requests waiting for a response.
    ///
    /// A `std::sync::Mutex` so the abandon guard can reap entries from
    /// `Drop`; every critical section is a plain map operation.
    pending: Arc<Mutex<PendingMap>>,
    /// Channel used to send serialized JSON-RPC messages to the transport.
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new `JsonRpcClient`.
    ///
    /// The caller is responsible for wiring `outbound_rx` to a transport
    /// writer and calling [`start_read_loop`] with the corresponding
    /// inbound receiver.
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
        }
    }

    /// Create a new [`JsonRpcClient`] that shares all internal state with
    /// `self`.
    ///
    /// The returned client shares the same `pending` map and `next_id`
    /// counter as the original, so a read loop holding one handle resolves
    /// requests issued through the other.
    pub fn clone_shared(&self) -> Self {
        Self {
            next_id: Arc::clone(&self.next_id),
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// Assigns the next monotonic ID, registers the pending slot, sends the
    /// serialized request on the outbound channel, and waits for the
    /// matching response with an optional timeout.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::Transport`] if the outbound channel is closed or
    ///   the read loop exits before a response arrives.
    /// - [`McpHubError::Timeout`] if no response arrives within the
    ///   deadline; a `notifications/cancelled` is sent downstream.
    /// - [`McpHubError::Protocol`] if the server returns an error response.
    /// - [`McpHubError::Serialization`] on encode/decode failure.
    pub async fn request<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| McpHubError::Internal("pending map lock poisoned".into()))?;
            pending.insert(id, tx);
        }

        // Reaps the pending slot and notifies the server if this future is
        // dropped (caller cancelled) or returns without a reply (timeout).
        let mut guard = AbandonGuard {
            pending: Arc::clone(&self.pending),
            outbound_tx: self.outbound_tx.clone(),
            id,
            armed: true,
        };

        self.outbound_tx
            .send(message)
            .map_err(|_| McpHubError::Transport("outbound channel closed".to_string()))?;

        let deadline = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let outcome = tokio::time::timeout(deadline, rx)
            .await
            .map_err(|_| McpHubError::Timeout {
                method: method.to_string(),
            })?;

        // A reply (success or error) arrived; nothing left to abandon.
        guard.armed = false;

        // The oneshot was dropped (read loop exited) before a response arrived.
        let rpc_result = outcome.map_err(|_| {
            McpHubError::Transport("read loop exited before response arrived".to_string())
        })?;

        let value = rpc_result.map_err(|e| McpHubError::Protocol {
            code: e.code,
            message: e.message,
        })?;

        serde_json::from_value(value).map_err(|e| McpHubError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// Notifications have no `id` field and the server MUST NOT reply.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the outbound channel is closed
    /// and [`McpHubError::Serialization`] if serialization fails.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| McpHubError::Transport("outbound channel closed".to_string()))?;

        Ok(())
    }
}

/// Cleans up after a request that never saw its reply.
///
/// On drop while armed, removes the pending slot; if the slot was still
/// present (the request was dispatched and unanswered) a
/// `notifications/cancelled` carrying the request ID is written so the
/// server can stop working on it.
struct AbandonGuard {
    pending: Arc<Mutex<PendingMap>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    id: u64,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let was_pending = match self.pending.lock() {
            Ok(mut map) => map.remove(&self.id).is_some(),
            Err(_) => false,
        };
        if was_pending {
            let notification = serde_json::json!({
                "jsonrpc": "2.0",
                "method": NOTIF_CANCELLED,
                "params": { "requestId": self.id }
            });
            let _ = self.outbound_tx.send(notification.to_string());
        }
    }
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop reads serialized JSON strings from `inbound_rx`, classifies
/// each message, and dispatches it:
///
/// - **Response** (has `"id"` and `"result"` or `"error"`): resolves the
///   matching pending [`oneshot`] sender.
/// - **Notification** (has `"method"` but no `"id"`): logged at trace level
///   and dropped; the gateway does not forward downstream notifications.
/// - **Server-initiated request** (has `"id"` and `"method"`): answered
///   with JSON-RPC `-32601 Method not found`.
///
/// On cancellation, all pending senders are dropped so that any in-flight
/// `request()` call receives a channel-closed error rather than blocking
/// until its deadline.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut recv_seq: u64 = 0;
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    clear_pending(&client);
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let raw = match maybe_msg {
                        Some(s) => s,
                        None => {
                            // Inbound channel closed; treat as cancellation.
                            clear_pending(&client);
                            break;
                        }
                    };

                    recv_seq += 1;
                    tracing::trace!(seq = recv_seq, "inbound JSON-RPC message");
                    dispatch_message(&raw, &client);
                }
            }
        }
    })
}

/// Drop every pending sender so awaiting callers unblock with an error.
fn clear_pending(client: &Arc<JsonRpcClient>) {
    if let Ok(mut pending) = client.pending.lock() {
        pending.clear();
    }
}

/// Classify and dispatch a single inbound JSON string.
fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some() && !value["id"].is_null();
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client);
    } else if has_id && has_method {
        // Server-initiated request: the gateway is not an MCP host, so
        // every method is unknown to it.
        reject_server_request(value, client);
    } else if has_method && !has_id {
        let method = value["method"].as_str().unwrap_or("");
        tracing::trace!("read loop: notification '{method}' dropped (no sink registered)");
    } else {
        tracing::debug!(
            "read loop: unclassifiable message ignored; \
             has_id={has_id} has_method={has_method} has_result={has_result} has_error={has_error}"
        );
    }
}

/// Resolve a pending request sender with the response value or error.
fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id: u64 = if let Some(n) = id_val.as_u64() {
        n
    } else if let Some(s) = id_val.as_str() {
        match s.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("read loop: response has non-integer id: {id_val}");
                return;
            }
        }
    } else {
        tracing::warn!("read loop: response has non-integer id: {id_val}");
        return;
    };

    let tx = match client.pending.lock() {
        Ok(mut pending) => pending.remove(&id),
        Err(_) => return,
    };

    let Some(tx) = tx else {
        tracing::debug!("read loop: response for unknown id {id}; ignoring");
        return;
    };

    let outcome: std::result::Result<serde_json::Value, JsonRpcError> =
        if let Some(error_val) = value.get("error") {
            match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
                Ok(e) => Err(e),
                Err(_) => Err(JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {error_val}"),
                    data: None,
                }),
            }
        } else {
            Ok(value
                .get("result")
                .cloned()
                .unwrap_or(serde_json::Value::Null))
        };

    // Ignore send errors: the caller may have already timed out.
    let _ = tx.send(outcome);
}

/// Answer a server-initiated request with `-32601 Method not found`.
fn reject_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let method = value
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();
    let id = value.get("id").cloned();

    let response = JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }),
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
