//! Public client configuration for the web front end.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config))
}

/// GET /api/config — identifiers the browser needs to sign the user in.
async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let m365 = &state.config.microsoft365;
    Json(serde_json::json!({
        "clientId": m365.client_id,
        "tenantId": m365.tenant_id,
    }))
}
