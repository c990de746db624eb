//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Status, version, and cache size |
//! | `GET` | `/tools/list` | Every tool with its JSON Schema |
//! | `POST` | `/tools/{name}` | Validate parameters and run a tool |
//! | `*` | `/mcp` | MCP Streamable HTTP endpoint |
//!
//! Successful tool calls answer `{"result": ...}`. Failures answer
//! `{"error": {"code", "message"}}` with a status derived from the
//! [`CatalogError`] variant:
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `query_syntax` | 400 |
//! | `not_found` | 404 |
//! | `cancelled` | 408 |
//! | `bad_upstream` | 502 |
//! | `unavailable` | 503 |
//!
//! Dropping the HTTP connection drops the handler future, which cancels
//! that request's token and with it any fetch it was leading.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hub_catalog_core::CatalogError;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::CatalogService;
use crate::config::Config;
use crate::mcp::McpBridge;
use crate::tools::{call_tool, ToolContext, ToolInfo, ToolNotFound, ToolRegistry};

#[derive(Clone)]
struct AppState {
    catalog: Arc<CatalogService>,
    tools: Arc<ToolRegistry>,
}

/// Build the router with every route and the `/mcp` service mounted.
pub fn router(catalog: Arc<CatalogService>) -> Router {
    let tools = Arc::new(ToolRegistry::with_builtins());

    let bridge = McpBridge::new(catalog.clone(), tools.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp)
        .layer(cors)
        .with_state(AppState { catalog, tools })
}

/// Bind `[server].bind` and serve until Ctrl-C, then drop cached entries.
pub async fn run_server(config: &Config, catalog: Arc<CatalogService>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(catalog.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to install Ctrl-C handler");
            }
        })
        .await?;

    catalog.dispatcher().cache().clear();
    tracing::info!("server stopped");
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::Validation(_) | CatalogError::QuerySyntax(_) => StatusCode::BAD_REQUEST,
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CatalogError::EnvelopeFormat(_) => StatusCode::BAD_GATEWAY,
        CatalogError::TransientUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Map a tool failure onto a status by downcasting to the error taxonomy.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    if let Some(missing) = err.downcast_ref::<ToolNotFound>() {
        return AppError {
            status: StatusCode::NOT_FOUND,
            code: "not_found".to_string(),
            message: missing.to_string(),
        };
    }
    match err.downcast_ref::<CatalogError>() {
        Some(catalog_err) => AppError {
            status: status_for(catalog_err),
            code: catalog_err.code().to_string(),
            message: format!("{}: {}", tool_name, catalog_err),
        },
        None => {
            tracing::error!(tool = tool_name, error = %err, "tool failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "tool_error".to_string(),
                message: format!("{}: {}", tool_name, err),
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    cached_entries: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cached_entries: state.catalog.dispatcher().cache().len(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancel = CancellationToken::new();
    let _on_disconnect = cancel.clone().drop_guard();
    let ctx = ToolContext::with_cancel(state.catalog.clone(), cancel);

    let result = call_tool(&state.tools, &name, &params, &ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_variant() {
        let cases = [
            (CatalogError::validation("x"), 400, "bad_request"),
            (CatalogError::QuerySyntax("x".into()), 400, "query_syntax"),
            (CatalogError::NotFound("x".into()), 404, "not_found"),
            (CatalogError::Cancelled, 408, "cancelled"),
            (CatalogError::EnvelopeFormat("x".into()), 502, "bad_upstream"),
            (
                CatalogError::TransientUnavailable {
                    attempts: 4,
                    message: "x".into(),
                },
                503,
                "unavailable",
            ),
        ];
        for (err, status, code) in cases {
            let app_err = classify_tool_error("search", err.into());
            assert_eq!(app_err.status.as_u16(), status);
            assert_eq!(app_err.code, code);
            assert!(app_err.message.starts_with("search: "));
        }
    }

    #[test]
    fn test_unknown_tool_is_404() {
        let err = classify_tool_error("nope", ToolNotFound("nope".into()).into());
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "no tool registered with name: nope");
    }

    #[test]
    fn test_untyped_error_is_500() {
        let err = classify_tool_error("search", anyhow::anyhow!("boom"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "tool_error");
    }
}
