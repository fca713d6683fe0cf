//! HTTP surface: registry endpoints and the MCP gateway
//!
//! Assembles the axum router over [`AppState`] and owns the single place
//! where error kinds become HTTP status codes. Handlers everywhere else
//! return errors as values.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::pool::ConnectionManager;
use crate::registry::SqliteRegistry;

pub mod gateway_routes;
pub mod models;
pub mod registry_routes;

use models::ErrorBody;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// The persistent server registry.
    pub registry: Arc<SqliteRegistry>,
    /// The session pool.
    pub manager: Arc<ConnectionManager>,
    /// Fires when the process is shutting down; SSE streams watch it.
    pub shutdown: CancellationToken,
}

/// Map an error to the HTTP status the gateway surface exposes.
pub fn status_for(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<McpHubError>() {
        Some(McpHubError::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(McpHubError::Conflict(_)) => StatusCode::CONFLICT,
        Some(McpHubError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(McpHubError::Transport(_)) | Some(McpHubError::Connect(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Some(McpHubError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error wrapper giving handlers `?` over [`crate::error::Result`].
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(err)
    }
}

impl From<McpHubError> for ApiError {
    fn from(err: McpHubError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("request failed ({status}): {:#}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(registry_routes::router())
        .merge(gateway_routes::router())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
