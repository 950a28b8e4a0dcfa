use std::net::IpAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Extracts the bearer token from an Authorization header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Creates a short, stable fragment of a credential for rate accounting.
///
/// The fragment distinguishes callers without retaining the credential
/// itself: only the first 4 bytes of a SHA-256 digest survive.
pub fn token_fragment(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

/// Extracts the client IP from proxy headers or the direct connection.
///
/// Preference order: trusted-proxy X-Forwarded-For (first hop), the CDN's
/// CF-Connecting-IP, then the raw peer address.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> String {
    // 1. Check X-Forwarded-For (first IP in chain)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_str) = forwarded_for.to_str()
    {
        // X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
        // We want the first (original client) IP
        let first_ip = forwarded_str.split(',').next().unwrap_or("").trim();
        if !first_ip.is_empty()
            && let Ok(ip) = first_ip.parse::<IpAddr>()
        {
            return normalize_ip(ip);
        }
    }

    // 2. Check CF-Connecting-IP (single IP, set by the CDN)
    if let Some(cf_ip) = headers.get("cf-connecting-ip")
        && let Ok(cf_ip_str) = cf_ip.to_str()
        && let Ok(ip) = cf_ip_str.trim().parse::<IpAddr>()
    {
        return normalize_ip(ip);
    }

    // 3. Fallback to direct connection IP
    if let Some(ip) = direct_ip {
        return normalize_ip(ip);
    }

    // 4. Last resort: return "unknown" (shouldn't happen in production)
    "unknown".to_string()
}

/// Normalizes IP address to string format (removes brackets for IPv6)
fn normalize_ip(ip: IpAddr) -> String {
    let ip_str = ip.to_string();
    ip_str
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}
