//! HTTP transport.
//!
//! axum router with the JSON-RPC endpoint at `POST /mcp` and the operator
//! health endpoint at `GET /health`. The body reaches the dispatcher as raw
//! text so malformed JSON still produces a JSON-RPC parse-error response;
//! transport-level failures (unknown route, adapter panic) answer with
//! plain HTTP errors independent of the JSON-RPC layer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, RequestContext};
use crate::error::{PopupError, Result};
use crate::server::ServerState;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub server: Arc<ServerState>,
}

/// Build the router: RPC endpoint, health endpoint, permissive CORS,
/// OPTIONS answered everywhere, JSON 404 for anything else.
pub fn router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/mcp", post(rpc_handler).options(options_handler))
        .route("/health", get(health_handler).options(options_handler))
        .fallback(fallback_handler)
        .layer(cors)
        .with_state(state)
}

/// POST /mcp: JSON-RPC endpoint.
async fn rpc_handler(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.server.connection_opened();

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let start = std::time::Instant::now();
    let response = state
        .dispatcher
        .dispatch(&body, RequestContext::http(origin))
        .await;
    debug!(
        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "HTTP request handled"
    );

    state.server.connection_closed();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
        .into_response()
}

/// GET /health: operator health snapshot.
async fn health_handler(State(state): State<HttpState>) -> Response {
    Json(state.server.health()).into_response()
}

/// OPTIONS preflight exchanges are answered without reaching the dispatcher.
async fn options_handler() -> Response {
    StatusCode::OK.into_response()
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

/// Serve HTTP on an already-bound listener until the shutdown signal.
pub async fn serve(
    listener: TcpListener,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            info!("HTTP transport received shutdown signal");
        })
        .await
        .map_err(|e| PopupError::Transport(format!("HTTP server failed: {e}")))?;

    info!("HTTP transport shut down");
    Ok(())
}
