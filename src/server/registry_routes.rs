//! Registry endpoints: register, list, get, search, delete, verify
//!
//! Registration runs a full discovery pass before anything is persisted;
//! a server that fails the handshake is never written. Deletion closes any
//! live pooled session before the repository delete returns.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use crate::error::McpHubError;
use crate::mcp::discovery::discover;
use crate::registry::types::{ServerRecord, ServerStatus};
use crate::registry::SEARCH_LIMIT_RANGE;
use crate::server::models::{
    ListServersQuery, RegisterServerRequest, SearchQuery, ServiceHealth, VerifyResponse,
};
use crate::server::{ApiError, AppState};

/// Default search result cap when the query string omits `limit`.
const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Routes owned by this module.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mcp/servers/register", post(register_server))
        .route("/mcp/servers", get(list_servers))
        .route(
            "/mcp/servers/:server_id",
            get(get_server).delete(delete_server),
        )
        .route("/mcp/servers/:server_id/verify", post(verify_server))
        .route("/mcp/search", get(search_capabilities))
        .route("/health", get(service_health))
}

/// Register a new MCP server.
///
/// Validates the configuration, performs the handshake and capability
/// discovery against the live server, then persists the record. Any
/// discovery failure aborts the registration with no partial write.
async fn register_server(
    State(state): State<AppState>,
    Json(request): Json<RegisterServerRequest>,
) -> Result<(StatusCode, Json<ServerRecord>), ApiError> {
    let (kind, description, config) = request.into_parts()?;

    let capabilities = discover(kind, &config).await?;

    let server_id = Uuid::new_v4().to_string();
    let record = state.registry.insert_server(
        &server_id,
        kind,
        description.as_deref(),
        &config,
        &capabilities,
    )?;

    tracing::info!(
        "registered server {server_id} ({kind}) with {} tools, {} resources, {} prompts",
        record.capabilities.tools.len(),
        record.capabilities.resources.len(),
        record.capabilities.prompts.len(),
    );

    Ok((StatusCode::CREATED, Json(record)))
}

/// List registered servers with optional type/status filters.
async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ListServersQuery>,
) -> Result<Json<Vec<ServerRecord>>, ApiError> {
    let servers = state.registry.list_servers(query.server_type, query.status)?;
    Ok(Json(servers))
}

/// Fetch one server with its capabilities.
async fn get_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<Json<ServerRecord>, ApiError> {
    let record = state
        .registry
        .get_server(&server_id)?
        .ok_or_else(|| McpHubError::NotFound(format!("MCP server not found: {server_id}")))?;
    Ok(Json(record))
}

/// Search capabilities across all active servers.
async fn search_capabilities(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<crate::registry::types::SearchMatch>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !SEARCH_LIMIT_RANGE.contains(&limit) {
        return Err(McpHubError::Validation(format!(
            "limit must be between {} and {}",
            SEARCH_LIMIT_RANGE.start(),
            SEARCH_LIMIT_RANGE.end()
        ))
        .into());
    }

    let matches = state.registry.search_capabilities(
        query.query.as_deref(),
        query.capability_type,
        query.server_type,
        limit,
    )?;
    Ok(Json(matches))
}

/// Delete a server and everything attached to it.
///
/// Any live pooled session is closed before the repository delete, so no
/// session can outlive its server record.
async fn delete_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.close_connection(&server_id).await;

    if !state.registry.delete_server(&server_id)? {
        return Err(McpHubError::NotFound(format!("MCP server not found: {server_id}")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Re-verify a server: rediscover capabilities and update the record.
///
/// Success marks the server active, bumps `last_verified`, and replaces
/// the stored capability triple wholesale. Failure marks it errored and
/// maps the discovery error onto the response status.
async fn verify_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let record = state
        .registry
        .get_server(&server_id)?
        .ok_or_else(|| McpHubError::NotFound(format!("MCP server not found: {server_id}")))?;

    match discover(record.kind, &record.config).await {
        Ok(capabilities) => {
            state
                .registry
                .update_status(&server_id, ServerStatus::Active, None)?;
            state
                .registry
                .replace_capabilities(&server_id, &capabilities)?;

            Ok(Json(VerifyResponse {
                server_id,
                status: ServerStatus::Active,
                message: "Server is reachable and responding".to_string(),
                capabilities,
            }))
        }
        Err(e) => {
            state
                .registry
                .update_status(&server_id, ServerStatus::Error, None)?;
            Err(e.into())
        }
    }
}

/// Process liveness.
async fn service_health() -> Json<ServiceHealth> {
    Json(ServiceHealth {
        status: "ok".to_string(),
        time: Utc::now(),
    })
}
