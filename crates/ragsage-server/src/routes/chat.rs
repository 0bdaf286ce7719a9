//! Chat route: one RAG turn per request.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ragsage_chat::{ChatError, ChatRequest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// POST /api/chat
async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    if !state.allow_anonymous_requests() && !req.has_access_token() {
        warn!("Authentication token is required but not provided");
        return error_response(StatusCode::UNAUTHORIZED, "Authentication token is required");
    }

    if req.has_access_token() {
        info!("Access token provided from web client");
    } else {
        info!("No access token provided, using the configured credential");
    }

    // Cancelled when the client goes away and this future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.orchestrator.process(&req, &cancel).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(ChatError::Auth(e)) => {
            error!("Authentication error processing chat request: {}", e);
            error_response(
                StatusCode::UNAUTHORIZED,
                "Authentication failed. Please sign in again.",
            )
        }
        Err(e) => {
            error!("Error processing chat request: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while processing your request",
            )
        }
    }
}
