//! MCP test server binary for integration tests
//!
//! This binary implements a minimal MCP server that communicates over
//! stdin/stdout using newline-delimited JSON (the stdio transport
//! protocol). It is used exclusively by integration tests to exercise the
//! stdio transport, discovery, pool, and gateway without requiring a real
//! external MCP server.
//!
//! # Handled Methods
//!
//! - `initialize` -- responds with protocol version `2025-03-26` and
//!   capabilities advertising tools, resources, and prompts.
//! - `notifications/initialized`, `notifications/cancelled` -- swallowed.
//! - `tools/list` -- one tool: `"echo"` with a string `message` parameter.
//! - `tools/call` with `name: "echo"` -- echoes back `arguments.message`.
//! - `resources/list` -- one resource, unless `MCP_TEST_FAIL_RESOURCES=1`
//!   in which case a `-32601` error is returned (exercises best-effort
//!   discovery).
//! - `resources/read` -- contents of the advertised resource.
//! - `prompts/list` -- one prompt `"greeting"` with a required `who`
//!   argument.
//! - `prompts/get` -- renders the greeting.
//! - `ping` -- empty result.
//! - everything else -- JSON-RPC `-32601 Method not found`.

use std::io::{self, BufRead, Write};

const RESOURCE_URI: &str = "memo://test/readme";

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                });
                let _ = writeln!(out, "{}", response);
                let _ = out.flush();
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        // Notifications carry no id and expect no reply.
        if method.starts_with("notifications/") {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => handle_tools_call(&id, &request),
            "resources/list" => handle_resources_list(&id),
            "resources/read" => handle_resources_read(&id, &request),
            "prompts/list" => handle_prompts_list(&id),
            "prompts/get" => handle_prompts_get(&id, &request),
            "ping" => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        let serialized = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("mcp_test_server: failed to serialize response: {}", e);
                continue;
            }
        };

        if writeln!(out, "{}", serialized).is_err() {
            break;
        }
        if out.flush().is_err() {
            break;
        }
    }
}

fn handle_initialize(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-03-26",
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": "mcp-test-server",
                "version": "0.1.0"
            }
        }
    })
}

fn handle_tools_list(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "message": { "type": "string" }
                        }
                    }
                }
            ]
        }
    })
}

fn handle_tools_call(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let params = request.get("params").unwrap_or(&serde_json::Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");

    if tool_name != "echo" {
        return make_error(id, -32602, &format!("Unknown tool: {}", tool_name));
    }

    let message = params
        .get("arguments")
        .and_then(|a| a.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("");

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [ { "type": "text", "text": message } ],
            "isError": false
        }
    })
}

fn handle_resources_list(id: &serde_json::Value) -> serde_json::Value {
    if std::env::var("MCP_TEST_FAIL_RESOURCES").as_deref() == Ok("1") {
        return make_error(id, -32601, "Method not found: resources/list");
    }

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "resources": [
                {
                    "uri": RESOURCE_URI,
                    "name": "readme",
                    "description": "A test memo",
                    "mimeType": "text/plain"
                }
            ]
        }
    })
}

fn handle_resources_read(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let uri = request
        .get("params")
        .and_then(|p| p.get("uri"))
        .and_then(|u| u.as_str())
        .unwrap_or("");

    if uri != RESOURCE_URI {
        return make_error(id, -32002, &format!("Resource not found: {}", uri));
    }

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "contents": [
                { "uri": RESOURCE_URI, "mimeType": "text/plain", "text": "hello from memo" }
            ]
        }
    })
}

fn handle_prompts_list(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "prompts": [
                {
                    "name": "greeting",
                    "description": "Greets someone by name",
                    "arguments": [
                        { "name": "who", "description": "Who to greet", "required": true }
                    ]
                }
            ]
        }
    })
}

fn handle_prompts_get(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let params = request.get("params").unwrap_or(&serde_json::Value::Null);
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");

    if name != "greeting" {
        return make_error(id, -32602, &format!("Unknown prompt: {}", name));
    }

    let who = params
        .get("arguments")
        .and_then(|a| a.get("who"))
        .and_then(|w| w.as_str())
        .unwrap_or("world");

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "messages": [
                {
                    "role": "user",
                    "content": { "type": "text", "text": format!("Hello, {}!", who) }
                }
            ]
        }
    })
}

fn make_error(id: &serde_json::Value, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
