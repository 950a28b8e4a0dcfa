// ============================================================================
// Request-Shaping Gate
// ============================================================================
//
// Admission-control middleware every externally-facing HTTP call passes
// through before reaching a pass-through handler. Per request, in order:
//
// 1. Whitelist check (before identity extraction: hot, trusted paths pay
//    nothing)
// 2. Dedup cache lookup: a hit short-circuits without touching the ledger
// 3. Sliding-window admission check: a denial answers 429 with a retry
//    hint and never reaches the handler
// 4. On allow, run the handler; successful responses become cache entries
//
// The gate does no network or disk I/O: ledger and cache operations are
// synchronous in-memory work. Internal defects in the shared structures
// fail open (the request is allowed) rather than failing closed.
//
// Bodies beyond the fingerprint budget opt out of the cache, never out of
// the relay: an oversized request still pays the admission check and is
// forwarded streaming, and an oversized (or unsized) successful response
// is returned untouched instead of being buffered for storage.
//
// ============================================================================

pub mod cache;
pub mod identity;
pub mod ledger;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::config::{GateConfig, MAX_REQUEST_BODY_SIZE};
use crate::context::AppContext;
use crate::error::AppError;

use cache::{CachedResponse, DedupCache, fingerprint};
use identity::extract_identity;
use ledger::{Admission, AdmissionLedger};

/// Shared gate state: the admission ledger and dedup cache, owned
/// explicitly and injected into the middleware (no process-wide statics).
pub struct RequestShapingGate {
    config: GateConfig,
    ledger: AdmissionLedger,
    cache: DedupCache,
}

impl RequestShapingGate {
    pub fn new(config: GateConfig) -> Self {
        let ledger = AdmissionLedger::new(config.window, config.ceiling);
        let cache = DedupCache::new(config.cache_ttl);
        Self {
            config,
            ledger,
            cache,
        }
    }

    /// Whether `path` (relative to the mount prefix) bypasses the gate
    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.config
            .whitelist_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn ledger(&self) -> &AdmissionLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// One reclamation pass over both shared structures
    pub fn sweep(&self, now: Instant) {
        self.ledger.sweep(now);
        self.cache.sweep(now);
    }
}

/// Admission-control middleware. Mounted on the gated router, so request
/// paths here are relative to the mount prefix.
pub async fn shape_request(
    State(ctx): State<AppContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let gate = &ctx.gate;
    let path = request.uri().path().to_string();

    // 1. Whitelisted paths skip identity extraction and all accounting
    if gate.is_whitelisted(&path) {
        return next.run(request).await;
    }

    let identity = extract_identity(request.headers(), Some(addr.ip()));

    // A body too large to fingerprint skips the cache but not the ledger;
    // the request passes through streaming, unbuffered
    let oversized = content_length(request.headers())
        .is_some_and(|len| len > MAX_REQUEST_BODY_SIZE as u64);

    let (request, fp) = if oversized {
        tracing::debug!(path = %path, identity = %identity, "body exceeds fingerprint budget, bypassing cache");
        (request, None)
    } else {
        // Buffer the body for fingerprinting; it is re-injected below
        let (parts, body) = request.into_parts();
        let body_bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY_SIZE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to buffer request body");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let fp = fingerprint(&identity, &path, &body_bytes);

        // 2. Dedup cache: a hit replays the stored response and leaves the
        //    ledger untouched
        if let Some(cached) = gate.cache().lookup(&fp, Instant::now()) {
            tracing::info!(path = %path, identity = %identity, "cache hit, replaying response");
            return cached_into_response(cached);
        }

        (Request::from_parts(parts, Body::from(body_bytes)), Some(fp))
    };

    // 3. Admission check
    match gate.ledger().admit(&identity, Instant::now()) {
        Admission::Allowed => {}
        Admission::Denied { retry_after } => {
            tracing::warn!(
                path = %path,
                identity = %identity,
                ceiling = gate.config.ceiling,
                "admission denied"
            );
            return AppError::TooManyRequests {
                retry_after_secs: retry_after.as_secs().max(1),
            }
            .into_response();
        }
    }

    // 4. Run the downstream handler
    let response = next.run(request).await;

    let Some(fp) = fp else {
        return response;
    };

    if !response.status().is_success() {
        return response;
    }

    // Only responses with a declared size within the buffering budget are
    // cache-eligible; anything larger or unsized is relayed untouched
    let cacheable = content_length(response.headers())
        .is_some_and(|len| len <= MAX_REQUEST_BODY_SIZE as u64);
    if !cacheable {
        return response;
    }

    // Buffer the successful response, store it, and rebuild
    let (parts, body) = response.into_parts();
    let response_bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "failed to buffer response body");
            return AppError::internal("response body unavailable").into_response();
        }
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    gate.cache().store(
        &fp,
        CachedResponse {
            status: parts.status,
            content_type,
            body: response_bytes.clone(),
        },
        Instant::now(),
    );

    Response::from_parts(parts, Body::from(response_bytes))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn cached_into_response(cached: CachedResponse) -> Response {
    let mut builder = Response::builder().status(cached.status);
    if let Some(content_type) = &cached.content_type
        && let Ok(value) = content_type.parse::<axum::http::HeaderValue>()
    {
        builder = builder.header(header::CONTENT_TYPE, value);
    }

    builder
        .body(Body::from(Bytes::clone(&cached.body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Spawns the periodic reclamation task for the ledger and cache. The
/// sweep is the only writer that removes entries outside the request path.
pub fn spawn_sweeper(gate: Arc<RequestShapingGate>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            gate.sweep(Instant::now());
            tracing::debug!(
                tracked_identities = gate.ledger().len(),
                cached_responses = gate.cache().len(),
                "gate sweep completed"
            );
        }
    });
}
