//! HTTP server: MCP endpoint plus a plain JSON tool API.
//!
//! All tools are registered in one [`ToolRegistry`] and dispatched the same
//! way from both surfaces.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `*`    | `/mcp` | MCP Streamable HTTP (JSON-RPC) |
//! | `GET`  | `/tools/list` | List all tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check |
//!
//! # Error contract
//!
//! Transport-level errors use
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "kb_name must not be empty" } }
//! ```
//!
//! with codes `bad_request` (400), `not_found` (404) and `tool_error` (500).
//! Operation failures are not transport errors: they return 200 with
//! `{"result": {"success": false, "message": ...}}`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Engine;
use crate::mcp::{McpBridge, SERVER_NAME};
use crate::tools::{ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// Build the router without binding, for embedding or tests.
pub fn app(engine: Arc<Engine>) -> Router {
    let tools = Arc::new(ToolRegistry::with_builtins(engine.default_top_k()));
    let ctx = ToolContext::new(engine);

    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .with_state(AppState { tools, ctx })
        .nest_service("/mcp", mcp)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(engine: Arc<Engine>, bind_addr: &str) -> anyhow::Result<()> {
    let app = app(engine);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "listening (MCP at /mcp, REST at /tools)");
    axum::serve(listener, app).await?;
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error",
        message: message.into(),
    }
}

/// Parameter problems are the only errors tools raise; anything else is a
/// server fault.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("must not be empty") || msg.contains("invalid") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    server: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server: SERVER_NAME,
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state
            .tools
            .tools()
            .iter()
            .map(|t| ToolInfo::of(t.as_ref()))
            .collect(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.tools.find(&name).is_none() {
        return Err(not_found(format!("no tool registered with name: {}", name)));
    }

    let result = state
        .tools
        .call(&name, &params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
