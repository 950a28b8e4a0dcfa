// ============================================================================
// Gateway Configuration
// ============================================================================
//
// Centralized configuration loaded from environment variables with sensible
// defaults. The only required variable is UPSTREAM_BASE_URL; startup fails
// fast with a clear error when it is missing or points the gateway at
// itself (which would create a proxy loop).
//
// ============================================================================

use std::time::Duration;

use anyhow::{Result, bail};

/// Service name used in health responses and startup logs
pub const SERVICE_NAME: &str = "mobile-gateway";

/// Maximum request/response body the gate will buffer for fingerprinting
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Main configuration structure for the gateway
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    /// Path prefix mobile clients call; stripped before forwarding upstream
    pub mount_prefix: String,

    // Sub-configurations
    pub upstream: UpstreamConfig,
    pub gate: GateConfig,
    pub cors: CorsConfig,
}

/// Upstream core service endpoints and resilience policy
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL of the core API, including its own prefix (e.g. ".../api/v1")
    pub base_url: String,
    /// Realtime event endpoint (ws:// or wss://)
    pub events_url: String,
    /// Per-request timeout for pass-through calls. Generous by default to
    /// ride out upstream cold starts.
    pub timeout_secs: u64,
    /// Bounded reconnect policy for upstream event sessions
    pub retry: RetryPolicy,
}

/// Bounded retry with fixed backoff for upstream connection attempts
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Admission control and dedup cache policy
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Sliding window duration for admission accounting
    pub window: Duration,
    /// Maximum admitted requests per identity per window
    pub ceiling: usize,
    /// Path prefixes (relative to the mount prefix) exempt from the gate
    pub whitelist_prefixes: Vec<String>,
    /// Visibility window for deduplicated responses
    pub cache_ttl: Duration,
    /// Period of the background ledger/cache sweep
    pub sweep_interval: Duration,
}

/// CORS policy for browser-originated requests
#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let Ok(base_url) = std::env::var("UPSTREAM_BASE_URL") else {
            bail!(
                "missing required environment variable UPSTREAM_BASE_URL; \
                 set it to the core API base URL before starting the gateway"
            );
        };

        // Guard against a proxy loop: the upstream must not be this gateway
        if let Ok(own_host) = std::env::var("GATEWAY_PUBLIC_HOST")
            && !own_host.is_empty()
            && base_url.contains(&own_host)
        {
            bail!(
                "UPSTREAM_BASE_URL ({}) points at the gateway's own host ({}); \
                 refusing to start with a proxy loop",
                base_url,
                own_host
            );
        }

        let events_url = std::env::var("UPSTREAM_EVENTS_URL")
            .unwrap_or_else(|_| derive_events_url(&base_url));

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            mount_prefix: std::env::var("MOUNT_PREFIX")
                .unwrap_or_else(|_| "/mobile-bff".to_string()),
            upstream: UpstreamConfig {
                base_url,
                events_url,
                timeout_secs: std::env::var("UPSTREAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(120),
                retry: RetryPolicy::from_env(),
            },
            gate: GateConfig::from_env(),
            cors: CorsConfig::from_env(),
        })
    }
}

impl RetryPolicy {
    pub(crate) fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("UPSTREAM_RETRY_ATTEMPTS")
                .ok()
                .and_then(|a| a.parse().ok())
                .unwrap_or(5),
            backoff: Duration::from_millis(
                std::env::var("UPSTREAM_RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}

impl GateConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            window: Duration::from_secs(
                std::env::var("RATE_WINDOW_SECS")
                    .ok()
                    .and_then(|w| w.parse().ok())
                    .unwrap_or(60),
            ),
            ceiling: std::env::var("RATE_MAX_REQUESTS")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(120),
            whitelist_prefixes: std::env::var("RATE_WHITELIST_PREFIXES")
                .map(|p| {
                    p.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["/auth/".to_string()]),
            cache_ttl: Duration::from_millis(
                std::env::var("CACHE_TTL_MS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(5000),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

impl CorsConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|o| {
                    o.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| {
                    vec![
                        "http://localhost:8081".to_string(),
                        "http://localhost:19000".to_string(),
                        "http://localhost:19006".to_string(),
                    ]
                }),
        }
    }
}

/// Derive the realtime event endpoint from the HTTP base URL: strip the API
/// prefix and swap the scheme (http -> ws, https -> wss).
fn derive_events_url(base_url: &str) -> String {
    let root = base_url.strip_suffix("/api/v1").unwrap_or(base_url);

    if let Some(rest) = root.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = root.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        root.to_string()
    }
}
