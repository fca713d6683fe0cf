//! Capability discovery integration tests
//!
//! Runs the one-shot discovery facade against the `mcp_test_server`
//! subprocess, including the best-effort behavior when a capability kind
//! is unsupported.

mod common;

use std::collections::HashMap;

use mcphub::error::McpHubError;
use mcphub::mcp::discovery::discover;
use mcphub::registry::types::{ServerConfig, TransportKind};

#[tokio::test]
async fn test_discovery_returns_full_capability_triple() {
    let config = common::test_server_config();

    let caps = discover(TransportKind::Stdio, &config)
        .await
        .expect("discovery failed");

    assert_eq!(caps.tools.len(), 1);
    assert_eq!(caps.tools[0].name, "echo");
    assert_eq!(caps.resources.len(), 1);
    assert_eq!(caps.resources[0].uri, "memo://test/readme");
    assert_eq!(caps.prompts.len(), 1);
    assert_eq!(caps.prompts[0].name, "greeting");
}

#[tokio::test]
async fn test_discovery_is_best_effort_per_kind() {
    // The test server errors on resources/list when this variable is set
    // in its (child) environment; tools and prompts keep working.
    let config = common::test_server_config_with_env(HashMap::from([(
        "MCP_TEST_FAIL_RESOURCES".to_string(),
        "1".to_string(),
    )]));

    let caps = discover(TransportKind::Stdio, &config)
        .await
        .expect("discovery must tolerate a failing capability kind");

    assert_eq!(caps.tools.len(), 1);
    assert!(
        caps.resources.is_empty(),
        "failing resources/list must yield an empty list"
    );
    assert_eq!(caps.prompts.len(), 1);
}

#[tokio::test]
async fn test_discovery_fails_for_missing_executable() {
    let config = ServerConfig::Stdio {
        command: "/nonexistent/echo-mcp".to_string(),
        args: vec![],
        env: HashMap::new(),
    };

    let err = discover(TransportKind::Stdio, &config).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpHubError>(),
        Some(McpHubError::Transport(_))
    ));
}
