use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::error::{EventSearchError, Result};
use crate::mcp::ToolContext;
use crate::model::SearchParams;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ToolContext>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn search_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SearchParams>, JsonRejection>,
) -> impl IntoResponse {
    let params = match payload {
        Ok(Json(params)) => params,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("invalid request body: {e}"),
                }),
            )
                .into_response()
        }
    };

    match state.ctx.run_search(params).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn healthz_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn build_router(ctx: Arc<ToolContext>) -> Router {
    let state = AppState { ctx };
    Router::new()
        .route("/search", post(search_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve_http(ctx: Arc<ToolContext>, config: &Config) -> Result<()> {
    let router = build_router(ctx);
    let addr = format!("{}:{}", config.server.http_addr, config.server.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EventSearchError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router).await.map_err(Into::into)
}
