//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mcphub::registry::types::ServerConfig;
use mcphub::registry::SqliteRegistry;

/// Returns the path to the `mcp_test_server` binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` automatically when running
/// integration tests in the same package. Falls back to searching in the
/// `target/debug` directory for convenience during manual testing.
pub fn test_server_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("mcp_test_server")
}

/// Stdio configuration pointing at the test server binary.
pub fn test_server_config() -> ServerConfig {
    test_server_config_with_env(HashMap::new())
}

/// Stdio configuration for the test server with extra environment.
pub fn test_server_config_with_env(env: HashMap<String, String>) -> ServerConfig {
    ServerConfig::Stdio {
        command: test_server_exe().to_string_lossy().to_string(),
        args: vec![],
        env,
    }
}

/// A fresh registry in a temporary directory.
///
/// The `TempDir` must be kept alive for the duration of the test.
pub fn temp_registry() -> (Arc<SqliteRegistry>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let registry =
        SqliteRegistry::open(dir.path().join("registry.db")).expect("failed to open registry");
    (Arc::new(registry), dir)
}
