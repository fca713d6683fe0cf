//! Pooled connections to registered MCP servers
//!
//! [`ConnectionManager`] keeps at most one live session per server id,
//! opening lazily on first use. Concurrent first uses collapse into a
//! single open (per-key lock plus a map lock for map mutation). A
//! background task evicts entries idle past the configured timeout, and
//! shutdown tears every entry down in order.
//!
//! # Teardown invariant
//!
//! Every [`PooledConnection`] holds both scoped handles: the session layer
//! and the transport beneath it. Close order is session-then-transport,
//! strictly the reverse of acquisition; getting this wrong corrupts stdio
//! pipes and leaks child processes. [`PooledConnection::close`] is latched
//! so the cleanup task, explicit close, and shutdown can all race it
//! safely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::session::McpSession;
use crate::mcp::transport::{open_transport, Transport};
use crate::registry::types::TransportKind;
use crate::registry::SqliteRegistry;

/// How often the cleanup task scans for idle entries.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle timeout before a session is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Externally visible state of one pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A healthy live session.
    Connected,
    /// No session exists for this server.
    Disconnected,
    /// A live session whose last health probe failed.
    Error,
}

/// Status counters for one pool entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// The server this entry belongs to.
    pub server_id: String,
    /// Current state.
    pub status: ConnectionState,
    /// When the session was opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Last time the session carried a request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    /// Failure detail when `status` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Requests served by this session.
    pub request_count: u64,
}

impl ConnectionStatus {
    /// Synthetic record for a server with no pool entry.
    pub fn disconnected(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            status: ConnectionState::Disconnected,
            connected_at: None,
            last_activity: None,
            error_message: None,
            request_count: 0,
        }
    }
}

/// One live session plus the transport beneath it.
pub struct PooledConnection {
    /// The server this session belongs to.
    pub server_id: String,
    /// The server's transport type.
    pub server_type: TransportKind,
    session: McpSession,
    transport: Arc<dyn Transport>,
    connected_at: DateTime<Utc>,
    last_activity: StdMutex<DateTime<Utc>>,
    request_count: AtomicU64,
    is_healthy: AtomicBool,
    error_message: StdMutex<Option<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("server_id", &self.server_id)
            .field("is_healthy", &self.is_healthy.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn new(
        server_id: String,
        server_type: TransportKind,
        session: McpSession,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            server_id,
            server_type,
            session,
            transport,
            connected_at: now,
            last_activity: StdMutex::new(now),
            request_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
            error_message: StdMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The initialized session carried by this entry.
    pub fn session(&self) -> &McpSession {
        &self.session
    }

    /// Whether the last health probe succeeded.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::SeqCst)
    }

    /// Record activity: bump `last_activity` and the request counter.
    fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Utc::now();
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
            .lock()
            .map(|at| *at)
            .unwrap_or(self.connected_at)
    }

    /// Probe the session and flip the in-memory health flag.
    ///
    /// Never mutates the persisted server status.
    pub async fn health_check(&self) -> bool {
        match self.session.probe().await {
            Ok(()) => {
                self.is_healthy.store(true, Ordering::SeqCst);
                if let Ok(mut msg) = self.error_message.lock() {
                    *msg = None;
                }
                true
            }
            Err(e) => {
                tracing::error!("health check failed for {}: {e}", self.server_id);
                self.is_healthy.store(false, Ordering::SeqCst);
                if let Ok(mut msg) = self.error_message.lock() {
                    *msg = Some(e.to_string());
                }
                false
            }
        }
    }

    /// Current status counters.
    pub fn status(&self) -> ConnectionStatus {
        let state = if self.is_healthy.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Error
        };
        ConnectionStatus {
            server_id: self.server_id.clone(),
            status: state,
            connected_at: Some(self.connected_at),
            last_activity: Some(self.last_activity()),
            error_message: self.error_message.lock().ok().and_then(|m| m.clone()),
            request_count: self.request_count.load(Ordering::Relaxed),
        }
    }

    /// Tear down this entry: session first, then transport.
    ///
    /// Latched; safe to invoke from the cleanup task, explicit close, and
    /// shutdown without double-close.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.close().await;
        self.transport.close().await;
    }
}

/// Keyed pool of live MCP sessions.
pub struct ConnectionManager {
    registry: Arc<SqliteRegistry>,
    idle_timeout: Duration,
    /// The pool map; mutated only under this lock.
    connections: Mutex<HashMap<String, Arc<PooledConnection>>>,
    /// Per-server open locks (single-flight), created lazily.
    open_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: CancellationToken,
    cleanup_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Build a manager over the given registry.
    pub fn new(registry: Arc<SqliteRegistry>, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry,
            idle_timeout,
            connections: Mutex::new(HashMap::new()),
            open_locks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            cleanup_task: StdMutex::new(None),
        })
    }

    /// Start the idle-eviction task.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {
                        manager.evict_idle().await;
                    }
                }
            }
        });
        if let Ok(mut task) = self.cleanup_task.lock() {
            *task = Some(handle);
        }
        tracing::info!("connection manager started");
    }

    /// Stop the manager: cancel and await the cleanup task, then close
    /// every entry.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.cleanup_task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.close_all().await;
        tracing::info!("connection manager stopped");
    }

    /// Get or create the per-server open lock.
    async fn open_lock(&self, server_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.open_locks.lock().await;
        Arc::clone(
            locks
                .entry(server_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Return a healthy session for `server_id`, opening one if needed.
    ///
    /// Single-flight: concurrent calls for a cold key perform exactly one
    /// open and all observe the same session.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::NotFound`] if the server is not registered.
    /// - [`McpHubError::Connect`] if the transport or handshake fails; the
    ///   map is left unchanged.
    pub async fn get_connection(&self, server_id: &str) -> Result<Arc<PooledConnection>> {
        // Fast path under the map lock.
        let stale = {
            let connections = self.connections.lock().await;
            match connections.get(server_id) {
                Some(conn) if conn.is_healthy() => {
                    conn.touch();
                    return Ok(Arc::clone(conn));
                }
                Some(conn) => Some(Arc::clone(conn)),
                None => None,
            }
        };

        // Unhealthy entry: close and reopen outside the map lock.
        if stale.is_some() {
            tracing::info!("connection unhealthy for {server_id}, reconnecting");
            self.close_connection(server_id).await;
        }

        let lock = self.open_lock(server_id).await;
        let _open_guard = lock.lock().await;

        // Double-check after acquiring the per-key lock.
        {
            let connections = self.connections.lock().await;
            if let Some(conn) = connections.get(server_id) {
                conn.touch();
                return Ok(Arc::clone(conn));
            }
        }

        self.create_connection(server_id).await
    }

    /// Open transport and session for a registered server and insert the
    /// entry. Caller holds the per-key lock.
    async fn create_connection(&self, server_id: &str) -> Result<Arc<PooledConnection>> {
        let record = self
            .registry
            .get_server(server_id)?
            .ok_or_else(|| McpHubError::NotFound(format!("server not found: {server_id}")))?;

        tracing::info!("creating connection to {server_id} ({})", record.kind);

        let transport = open_transport(record.kind, &record.config)
            .await
            .map_err(|e| McpHubError::Connect(format!("failed to connect to server: {e}")))?;

        let session = McpSession::connect(Arc::clone(&transport));
        if let Err(e) = session.initialize().await {
            // Failed handshake: reclaim in reverse order, map untouched.
            session.close().await;
            transport.close().await;
            return Err(McpHubError::Connect(format!("failed to connect to server: {e}")).into());
        }

        let conn = Arc::new(PooledConnection::new(
            server_id.to_string(),
            record.kind,
            session,
            transport,
        ));
        conn.touch();

        let mut connections = self.connections.lock().await;
        connections.insert(server_id.to_string(), Arc::clone(&conn));
        tracing::info!("connected to {server_id}");
        Ok(conn)
    }

    /// Remove and tear down one entry. Returns whether an entry existed.
    pub async fn close_connection(&self, server_id: &str) -> bool {
        let conn = {
            let mut connections = self.connections.lock().await;
            connections.remove(server_id)
        };
        match conn {
            Some(conn) => {
                tracing::info!("closing connection to {server_id}");
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Orderly teardown of every entry.
    pub async fn close_all(&self) {
        let server_ids: Vec<String> = {
            let connections = self.connections.lock().await;
            connections.keys().cloned().collect()
        };
        for server_id in server_ids {
            self.close_connection(&server_id).await;
        }
    }

    /// Run one idle-eviction sweep: close entries idle past the timeout.
    ///
    /// Called by the cleanup task every [`CLEANUP_INTERVAL`]. Idle
    /// candidates are identified under the map lock, closed outside it,
    /// and removed only if the map still holds the same entry, so the
    /// sweep never blocks a concurrent acquire.
    pub async fn evict_idle(&self) {
        let now = Utc::now();
        let idle: Vec<(String, Arc<PooledConnection>)> = {
            let connections = self.connections.lock().await;
            connections
                .iter()
                .filter(|(_, conn)| {
                    let idle_for = now - conn.last_activity();
                    idle_for.num_seconds() > self.idle_timeout.as_secs() as i64
                })
                .map(|(id, conn)| (id.clone(), Arc::clone(conn)))
                .collect()
        };

        for (server_id, conn) in idle {
            tracing::info!("closing idle connection to {server_id}");
            conn.close().await;
            let mut connections = self.connections.lock().await;
            if let Some(current) = connections.get(&server_id) {
                if Arc::ptr_eq(current, &conn) {
                    connections.remove(&server_id);
                }
            }
        }
    }

    /// Probe one entry, flipping its in-memory health flag.
    ///
    /// Returns `false` when no entry exists.
    pub async fn health_check(&self, server_id: &str) -> bool {
        let conn = {
            let connections = self.connections.lock().await;
            connections.get(server_id).map(Arc::clone)
        };
        match conn {
            Some(conn) => conn.health_check().await,
            None => false,
        }
    }

    /// Probe every entry.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let entries: Vec<(String, Arc<PooledConnection>)> = {
            let connections = self.connections.lock().await;
            connections
                .iter()
                .map(|(id, conn)| (id.clone(), Arc::clone(conn)))
                .collect()
        };
        let mut results = HashMap::new();
        for (server_id, conn) in entries {
            results.insert(server_id, conn.health_check().await);
        }
        results
    }

    /// Status of one entry, if present.
    pub async fn connection_status(&self, server_id: &str) -> Option<ConnectionStatus> {
        let connections = self.connections.lock().await;
        connections.get(server_id).map(|conn| conn.status())
    }

    /// Status of every entry.
    pub async fn all_statuses(&self) -> Vec<ConnectionStatus> {
        let connections = self.connections.lock().await;
        connections.values().map(|conn| conn.status()).collect()
    }

    /// Number of live entries.
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
