// ============================================================================
// Mobile Gateway
// ============================================================================
//
// Backend-for-frontend in front of the core API:
//
// - Realtime session bridge: one dedicated upstream event session per
//   connected mobile client, bidirectional name-agnostic forwarding
// - Request-shaping gate: per-identity sliding-window admission control
//   with a whitelist and a short-TTL dedup response cache
// - Pass-through proxy for everything else under the mount prefix
//
// ============================================================================

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod health;
pub mod proxy;
pub mod utils;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub use context::AppContext;
pub use error::{AppError, AppResult};

/// Assembles the full gateway router.
///
/// Health endpoints and the realtime socket sit outside the gate; the
/// pass-through surface is nested under the mount prefix, so paths seen by
/// the gate and the proxy are relative to it.
pub fn build_router(ctx: AppContext) -> Router {
    let gated = Router::new()
        .fallback(proxy::relay)
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            gate::shape_request,
        ));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/socket", get(bridge::socket_handler))
        .nest(&ctx.config.mount_prefix, gated)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&ctx.config.cors.allowed_origins))
        .with_state(ctx)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
