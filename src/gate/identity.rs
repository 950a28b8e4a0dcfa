// ============================================================================
// Identity Extractor
// ============================================================================
//
// Derives a coarse caller identity for rate accounting and cache keying.
// Identity is a heuristic, not an authentication decision: collisions are
// tolerated, and extraction never fails.
//
// ============================================================================

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::utils::{bearer_token, extract_client_ip, token_fragment};

/// Derives a ClientIdentity key from request headers and network origin.
///
/// Preference order:
/// 1. A stable fragment of the bearer credential, so two authenticated
///    users behind one NAT are accounted separately.
/// 2. The client IP (X-Forwarded-For, then CF-Connecting-IP, then the raw
///    peer address).
///
/// Falls back to "unknown" rather than rejecting the request.
pub fn extract_identity(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> String {
    if let Some(token) = bearer_token(headers) {
        return format!("tok:{}", token_fragment(token));
    }

    let ip = extract_client_ip(headers, direct_ip);
    if ip == "unknown" {
        ip
    } else {
        format!("ip:{}", ip)
    }
}
