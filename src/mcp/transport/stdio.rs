//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing. This is the standard transport for
//! locally-installed MCP servers.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped before delivery).
//! - The child's stderr is forwarded to a diagnostic stream and logged via
//!   `tracing::debug!`. Per the MCP specification, stderr output MUST NOT be
//!   treated as an error condition.
//!
//! # Lifecycle
//!
//! The transport is created via [`StdioTransport::spawn`]. Two background
//! Tokio tasks are started immediately: one drains stdout, one drains
//! stderr. [`Transport::close`] sends SIGTERM (Unix) and waits up to
//! [`SHUTDOWN_GRACE`] for the child to exit before killing it; `Drop` keeps
//! a fire-and-forget SIGTERM as a backstop for paths that never reached
//! `close`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{McpHubError, Result};
use crate::mcp::transport::Transport;

/// How long a child gets between graceful termination and a hard kill.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stdio-based MCP transport that drives a child process.
///
/// Communication happens over the child's stdin (outbound) and stdout
/// (inbound) using newline-delimited JSON. The child's stderr is captured
/// and forwarded through [`Transport::receive_err`] as diagnostic-only
/// output.
#[derive(Debug)]
pub struct StdioTransport {
    /// Sender side of the stdin channel; `send()` writes here.
    stdin_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared receiver for stderr lines (diagnostics only).
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Handle to the spawned child process; used by `close` and `Drop`.
    child: Arc<Mutex<Child>>,
    /// Latch: set once `close` has run.
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// The child's environment is a minimal base (the parent's `PATH`, so
    /// relative executables keep resolving) merged with the caller-supplied
    /// `env` map; everything else from the parent environment is cleared.
    ///
    /// Two background Tokio tasks are started immediately: a stdout reader
    /// delivering each line to `receive()`, and a stderr reader delivering
    /// each line to `receive_err()` and `tracing::debug!`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the process cannot be spawned
    /// (executable not found) or if the stdio pipes are unavailable.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(env);

        let mut child = cmd.spawn().map_err(|e| {
            McpHubError::Transport(format!("failed to spawn MCP server `{command}`: {e}"))
        })?;

        // Take ownership of all three stdio handles. Each is guaranteed to be
        // Some because we set Stdio::piped() above.
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpHubError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpHubError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpHubError::Transport("child stderr unavailable after spawn".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        // Background task: forward stdin_rx -> child stdin, preserving write order.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stdout -> stdout_tx with a receive sequence.
        tokio::spawn(async move {
            let recv_seq = AtomicU64::new(0);
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let seq = recv_seq.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(seq, "stdio transport inbound message");
                if stdout_tx.send(line).is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stderr -> stderr_tx + tracing log.
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mcphub::mcp::transport::stdio", "mcp server stderr: {}", line);
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver a graceful termination signal to the child.
    fn signal_terminate(child: &Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Send a JSON-RPC message to the child process via its stdin.
    ///
    /// The message is enqueued on an internal channel; a background task
    /// writes it to the child's stdin followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the internal channel is closed
    /// (the background writer task has exited).
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx
            .send(message)
            .map_err(|e| McpHubError::Transport(format!("stdin channel closed: {e}")).into())
    }

    /// Returns a stream of JSON-RPC messages received from the child's
    /// stdout (one complete JSON object per item, newline stripped).
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stdout_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Returns a stream of diagnostic lines from the child's stderr.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Terminate the child process: graceful signal, bounded grace, kill.
    ///
    /// Waits for the child to be reaped before returning, so no zombie
    /// survives a completed `close`. Safe to call from cleanup, explicit
    /// close, and shutdown; only the first call acts.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut child = self.child.lock().await;
        Self::signal_terminate(&child);

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("mcp server did not exit within grace period; killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination when the transport was never closed.
    ///
    /// This method MUST NOT block; it is fire-and-forget.
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(child) = self.child.try_lock() {
            Self::signal_terminate(&child);
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}
