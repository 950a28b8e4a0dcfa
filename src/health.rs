use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::config::SERVICE_NAME;
use crate::context::AppContext;

/// Root endpoint: confirms the gateway is up and names the upstream it
/// fronts. Not gated.
pub async fn root(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "upstream": ctx.config.upstream.base_url,
    }))
}

/// Liveness probe for orchestrators
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
    }))
}
