//! One-shot capability discovery
//!
//! Used at registration and verification: open the transport for a server
//! configuration, run the initialize handshake, list the three capability
//! kinds, and tear everything down again. Each list call is best-effort
//! (servers need not implement all three kinds); a failed handshake or
//! transport open fails the whole discovery and the surrounding
//! registration.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{McpHubError, Result};
use crate::mcp::session::McpSession;
use crate::mcp::transport::open_transport;
use crate::mcp::types::CapabilitySet;
use crate::registry::types::{ServerConfig, TransportKind};

/// Overall deadline for one discovery pass.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect to an MCP server and discover its capabilities.
///
/// 1. Open the transport for `kind`; failure propagates as
///    [`McpHubError::Transport`].
/// 2. Open a session and run initialize; failure propagates as
///    [`McpHubError::Protocol`] (or transport/timeout kinds).
/// 3. Call `tools/list`, `resources/list`, `prompts/list`. Each is
///    best-effort: a failure on one kind yields an empty list for that kind
///    without failing the call.
/// 4. Close session then transport, in that order, regardless of outcome.
///
/// The whole pass is bounded by [`DISCOVERY_TIMEOUT`].
pub async fn discover(kind: TransportKind, config: &ServerConfig) -> Result<CapabilitySet> {
    tokio::time::timeout(DISCOVERY_TIMEOUT, discover_once(kind, config))
        .await
        .map_err(|_| McpHubError::Timeout {
            method: "discover".to_string(),
        })?
}

async fn discover_once(kind: TransportKind, config: &ServerConfig) -> Result<CapabilitySet> {
    let transport = open_transport(kind, config).await?;
    let session = McpSession::connect(Arc::clone(&transport));

    if let Err(e) = session.initialize().await {
        session.close().await;
        transport.close().await;
        return Err(e);
    }

    let tools = match session.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::debug!("server does not expose tools: {e}");
            Vec::new()
        }
    };

    let resources = match session.list_resources().await {
        Ok(resources) => resources,
        Err(e) => {
            tracing::debug!("server does not expose resources: {e}");
            Vec::new()
        }
    };

    let prompts = match session.list_prompts().await {
        Ok(prompts) => prompts,
        Err(e) => {
            tracing::debug!("server does not expose prompts: {e}");
            Vec::new()
        }
    };

    session.close().await;
    transport.close().await;

    Ok(CapabilitySet {
        tools,
        resources,
        prompts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::fake::FakeTransport;
    use crate::mcp::transport::Transport;

    /// Discovery body against a scripted transport, reusing the same
    /// session/list/teardown sequence as `discover_once`.
    ///
    /// `open_transport` only constructs real transports, so unit tests
    /// inject the fake directly and exercise the sequence after the open.
    async fn discover_over(transport: Arc<FakeTransport>) -> Result<CapabilitySet> {
        let transport: Arc<dyn Transport> = transport;
        let session = McpSession::connect(Arc::clone(&transport));

        if let Err(e) = session.initialize().await {
            session.close().await;
            transport.close().await;
            return Err(e);
        }

        let tools = session.list_tools().await.unwrap_or_default();
        let resources = session.list_resources().await.unwrap_or_default();
        let prompts = session.list_prompts().await.unwrap_or_default();

        session.close().await;
        transport.close().await;

        Ok(CapabilitySet {
            tools,
            resources,
            prompts,
        })
    }

    #[tokio::test]
    async fn test_best_effort_discovery_tolerates_failing_kind() {
        // resources/list errors, tools and prompts succeed.
        let transport = Arc::new(FakeTransport::with_initialized_responder(|method, req| {
            let id = req["id"].clone();
            match method {
                "tools/list" => Some(serde_json::json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": { "tools": [{ "name": "echo", "inputSchema": {} }] }
                })),
                "resources/list" => Some(serde_json::json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": { "code": -32601, "message": "Method not found" }
                })),
                "prompts/list" => Some(serde_json::json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": { "prompts": [{ "name": "greeting" }] }
                })),
                _ => None,
            }
        }));

        let caps = discover_over(Arc::clone(&transport))
            .await
            .expect("discovery should succeed despite failing resources/list");

        assert_eq!(caps.tools.len(), 1);
        assert!(caps.resources.is_empty());
        assert_eq!(caps.prompts.len(), 1);
        // Transport closed exactly once after the session.
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_initialize_aborts_discovery_and_closes() {
        let transport = Arc::new(FakeTransport::with_responder(|req| {
            Some(serde_json::json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32600, "message": "unsupported client" }
            }))
        }));

        let result = discover_over(Arc::clone(&transport)).await;
        assert!(result.is_err(), "failed initialize must fail discovery");
        assert_eq!(transport.close_calls(), 1, "transport must still be closed");
    }

    #[tokio::test]
    async fn test_open_failure_maps_to_transport_error() {
        let config = ServerConfig::Stdio {
            command: "/nonexistent/mcp-server-binary".to_string(),
            args: vec![],
            env: Default::default(),
        };
        let result = discover(TransportKind::Stdio, &config).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_config_rejected() {
        let config = ServerConfig::Stdio {
            command: "echo".to_string(),
            args: vec![],
            env: Default::default(),
        };
        let result = discover(TransportKind::Http, &config).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::Validation(_))
        ));
    }
}
