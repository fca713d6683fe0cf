//! Gateway endpoints: JSON-RPC proxy, REST shortcuts, SSE stream, status
//!
//! Stateless request layer over the session pool. The JSON-RPC proxy
//! carries the caller's request `id` through verbatim and answers unknown
//! methods / missing parameters inside the JSON-RPC envelope; transport
//! and pool failures surface as HTTP statuses via [`ApiError`].
//!
//! The SSE endpoint is a keep-alive probe: `connected`, a `ping` every
//! [`SSE_PING_INTERVAL`], and a final `disconnected`. It does not forward
//! server-initiated MCP notifications.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_stream::wrappers::IntervalStream;

use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::pool::{ConnectionState, ConnectionStatus};
use crate::server::models::{
    GatewayEvent, GatewayEventKind, GatewayHealth, GatewayHealthResponse, PromptGetRequest,
    PromptGetResponse, ResourceReadRequest, ResourceReadResponse, ToolCallRequest,
    ToolCallResponse,
};
use crate::server::{ApiError, AppState};

/// Keep-alive cadence of the gateway SSE stream.
pub const SSE_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Routes owned by this module.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mcp/gateway/:server_id/message", post(message_proxy))
        .route("/mcp/gateway/:server_id/sse", get(sse_proxy))
        .route(
            "/mcp/gateway/:server_id/tools/:tool_name",
            post(call_tool_direct),
        )
        .route(
            "/mcp/gateway/:server_id/resources/read",
            post(read_resource_direct),
        )
        .route(
            "/mcp/gateway/:server_id/prompts/get",
            post(get_prompt_direct),
        )
        .route("/mcp/gateway/:server_id/status", get(connection_status))
        .route("/mcp/gateway/health", get(gateway_health))
}

/// Build a JSON-RPC error response carrying the original request id.
fn rpc_error(id: Option<serde_json::Value>, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: None,
        }),
    }
}

/// Build a JSON-RPC success response carrying the original request id.
fn rpc_result(id: Option<serde_json::Value>, result: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

/// HTTP JSON-RPC message proxy.
///
/// Forwards a single JSON-RPC request to the server's pooled session,
/// dispatching on `method`. Unknown methods answer `-32601`, missing
/// required parameters `-32602`, both inside a `200` JSON-RPC envelope.
async fn message_proxy(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(message): Json<JsonRpcRequest>,
) -> Result<Json<JsonRpcResponse>, ApiError> {
    let conn = state.manager.get_connection(&server_id).await?;
    let session = conn.session();
    let id = message.id;
    let params = message.params.unwrap_or(serde_json::Value::Null);

    let response = match message.method.as_str() {
        "tools/list" => {
            let tools = session.list_tools().await?;
            rpc_result(id, serde_json::json!({ "tools": tools }))
        }
        "resources/list" => {
            let resources = session.list_resources().await?;
            rpc_result(id, serde_json::json!({ "resources": resources }))
        }
        "prompts/list" => {
            let prompts = session.list_prompts().await?;
            rpc_result(id, serde_json::json!({ "prompts": prompts }))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
                return Ok(Json(rpc_error(
                    id,
                    -32602,
                    "Missing required parameter: name".to_string(),
                )));
            };
            let arguments = params.get("arguments").cloned();
            let result = session.call_tool(name, arguments).await?;
            rpc_result(
                id,
                serde_json::json!({ "content": result.content, "isError": result.is_error }),
            )
        }
        "resources/read" => {
            let Some(uri) = params.get("uri").and_then(|u| u.as_str()) else {
                return Ok(Json(rpc_error(
                    id,
                    -32602,
                    "Missing required parameter: uri".to_string(),
                )));
            };
            let result = session.read_resource(uri).await?;
            rpc_result(id, serde_json::json!({ "contents": result.contents }))
        }
        "prompts/get" => {
            let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
                return Ok(Json(rpc_error(
                    id,
                    -32602,
                    "Missing required parameter: name".to_string(),
                )));
            };
            let arguments: Option<HashMap<String, String>> = params
                .get("arguments")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());
            let result = session.get_prompt(name, arguments).await?;
            rpc_result(id, serde_json::json!({ "messages": result.messages }))
        }
        other => rpc_error(id, -32601, format!("Method not found: {other}")),
    };

    Ok(Json(response))
}

/// Serialize a gateway event for the SSE `data` field.
fn event_payload(event: &GatewayEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}

/// SSE keep-alive stream for one server.
///
/// Emits `connected`, then `ping` every [`SSE_PING_INTERVAL`] until the
/// client disconnects (the stream is dropped) or the process shuts down,
/// then a final `disconnected`. If the session cannot be acquired the
/// stream carries one `error` event followed by `disconnected`.
async fn sse_proxy(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Sse<BoxStream<'static, Result<Event, Infallible>>> {
    let disconnected = Event::default().event("disconnected").data(event_payload(
        &GatewayEvent::new(
            GatewayEventKind::Disconnected,
            &server_id,
            Some(serde_json::json!({"message": "Disconnected from MCP server"})),
        ),
    ));

    let stream: BoxStream<'static, Result<Event, Infallible>> =
        match state.manager.get_connection(&server_id).await {
            Ok(_conn) => {
                let connected = Event::default().event("connected").data(event_payload(
                    &GatewayEvent::new(
                        GatewayEventKind::Connected,
                        &server_id,
                        Some(serde_json::json!({"message": "Connected to MCP server"})),
                    ),
                ));

                // First tick only after a full interval; `connected` is the
                // immediate event.
                let interval = tokio::time::interval_at(
                    tokio::time::Instant::now() + SSE_PING_INTERVAL,
                    SSE_PING_INTERVAL,
                );
                let pings = IntervalStream::new(interval).map(|_| {
                    Ok(Event::default().event("ping").data(
                        serde_json::json!({ "timestamp": Utc::now().to_rfc3339() }).to_string(),
                    ))
                });

                stream::once(async move { Ok(connected) })
                    .chain(pings.take_until(state.shutdown.clone().cancelled_owned()))
                    .chain(stream::once(async move { Ok(disconnected) }))
                    .boxed()
            }
            Err(e) => {
                tracing::warn!("SSE stream could not acquire {server_id}: {e:#}");
                let error_event = Event::default().event("error").data(event_payload(
                    &GatewayEvent::new(
                        GatewayEventKind::Error,
                        &server_id,
                        Some(serde_json::json!({"error": e.to_string()})),
                    ),
                ));
                stream::iter(vec![Ok(error_event), Ok(disconnected)]).boxed()
            }
        };

    Sse::new(stream)
}

/// Direct tool invocation: `POST /mcp/gateway/{id}/tools/{name}`.
async fn call_tool_direct(
    State(state): State<AppState>,
    Path((server_id, tool_name)): Path<(String, String)>,
    Json(request): Json<ToolCallRequest>,
) -> Result<Json<ToolCallResponse>, ApiError> {
    let conn = state.manager.get_connection(&server_id).await?;
    let result = conn.session().call_tool(&tool_name, request.arguments).await?;

    Ok(Json(ToolCallResponse {
        tool: tool_name,
        content: result.content,
        is_error: result.is_error,
    }))
}

/// Direct resource read: `POST /mcp/gateway/{id}/resources/read`.
async fn read_resource_direct(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(request): Json<ResourceReadRequest>,
) -> Result<Json<ResourceReadResponse>, ApiError> {
    let conn = state.manager.get_connection(&server_id).await?;
    let result = conn.session().read_resource(&request.uri).await?;

    Ok(Json(ResourceReadResponse {
        uri: request.uri,
        contents: result.contents,
    }))
}

/// Direct prompt retrieval: `POST /mcp/gateway/{id}/prompts/get`.
async fn get_prompt_direct(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(request): Json<PromptGetRequest>,
) -> Result<Json<PromptGetResponse>, ApiError> {
    let conn = state.manager.get_connection(&server_id).await?;
    let result = conn
        .session()
        .get_prompt(&request.name, request.arguments)
        .await?;

    Ok(Json(PromptGetResponse {
        name: request.name,
        messages: result.messages,
    }))
}

/// Pool status for one server; synthesizes `disconnected` when no entry
/// exists.
async fn connection_status(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Json<ConnectionStatus> {
    let status = state
        .manager
        .connection_status(&server_id)
        .await
        .unwrap_or_else(|| ConnectionStatus::disconnected(&server_id));
    Json(status)
}

/// Aggregate one health verdict from the individual entry statuses.
fn aggregate_health(statuses: &[ConnectionStatus]) -> GatewayHealth {
    let total = statuses.len();
    let active = statuses
        .iter()
        .filter(|s| s.status == ConnectionState::Connected)
        .count();

    if total == 0 || active == total {
        GatewayHealth::Healthy
    } else if active > 0 {
        GatewayHealth::Degraded
    } else {
        GatewayHealth::Unhealthy
    }
}

/// Overall gateway health: `GET /mcp/gateway/health`.
async fn gateway_health(State(state): State<AppState>) -> Json<GatewayHealthResponse> {
    let connections = state.manager.all_statuses().await;
    let active_servers = connections
        .iter()
        .filter(|s| s.status == ConnectionState::Connected)
        .count();

    Json(GatewayHealthResponse {
        status: aggregate_health(&connections),
        total_connections: connections.len(),
        active_servers,
        connections,
    })
}
