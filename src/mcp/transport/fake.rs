//! Scripted in-process transport for unit tests
//!
//! [`FakeTransport`] lets session and discovery tests run the full
//! request/response machinery without a child process or network. A
//! caller-supplied responder closure receives each outbound request and
//! returns the full JSON-RPC response to deliver inbound (or `None` to stay
//! silent, which exercises timeout paths).

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;
use crate::mcp::transport::Transport;

/// Maps an outbound JSON-RPC request to the response to inject, if any.
type Responder = Box<dyn Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// In-process transport driven by a scripted responder.
pub struct FakeTransport {
    responder: Responder,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    err_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Every message passed to `send`, parsed.
    sent: StdMutex<Vec<serde_json::Value>>,
    /// Number of times `close` was invoked (idempotency assertions).
    close_calls: AtomicUsize,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("close_calls", &self.close_calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FakeTransport {
    /// Build a fake transport around a responder closure.
    ///
    /// The responder is called for every outbound message that carries an
    /// `id` (requests); notifications are recorded but not answered.
    pub fn with_responder(
        responder: impl Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (_err_tx, err_rx) = mpsc::unbounded_channel();
        Self {
            responder: Box::new(responder),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            err_rx: Arc::new(Mutex::new(err_rx)),
            sent: StdMutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// A responder that answers `initialize` correctly and delegates every
    /// other request to `f`.
    ///
    /// Most session tests only care about the post-handshake operations;
    /// this keeps their scripting to the interesting methods.
    pub fn with_initialized_responder(
        f: impl Fn(&str, &serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self::with_responder(move |req| {
            let id = req.get("id").cloned().unwrap_or(serde_json::Value::Null);
            let method = req.get("method").and_then(|m| m.as_str()).unwrap_or("");
            if method == "initialize" {
                return Some(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": crate::mcp::types::LATEST_PROTOCOL_VERSION,
                        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                        "serverInfo": { "name": "fake", "version": "0.0.0" }
                    }
                }));
            }
            f(method, req)
        })
    }

    /// All messages passed to `send`, parsed as JSON.
    pub fn sent_messages(&self) -> Vec<serde_json::Value> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of completed `close` invocations.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(&message)?;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(value.clone());
        }

        let is_request = value.get("id").map(|id| !id.is_null()).unwrap_or(false);
        if is_request {
            if let Some(response) = (self.responder)(&value) {
                let _ = self.inbound_tx.send(response.to_string());
            }
        }
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.err_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}
