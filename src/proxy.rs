// ============================================================================
// Pass-Through Proxy
// ============================================================================
//
// Fallback handler behind the gate: any request that survives admission
// control is relayed verbatim to the upstream core API. The mount prefix
// is already stripped by the router; this module only applies the small
// path-rewrite table and copies the response back unmodified. Bodies are
// streamed through in both directions, so payload size never changes the
// relay's behavior.
//
// ============================================================================

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header},
    response::Response,
};

use crate::context::AppContext;
use crate::error::AppError;

/// HTTP client for pass-through calls to the upstream core API
pub struct PassThroughClient {
    client: reqwest::Client,
    base_url: String,
}

impl PassThroughClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Relay one request upstream, streaming the body through untouched.
    pub async fn forward(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, AppError> {
        let target = format!("{}{}", self.base_url, path_and_query);
        tracing::debug!(method = %method, target = %target, "relaying request upstream");

        let mut request = self.client.request(method, &target);
        for (name, value) in headers {
            // The host header must name the upstream, not the gateway
            if name == header::HOST {
                continue;
            }
            request = request.header(name, value);
        }

        Ok(request.body(body).send().await?)
    }
}

/// Rewrites gateway-relative paths to their upstream counterparts.
/// Currently only the store alias differs; everything else maps 1:1.
fn rewrite_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/store")
        && (rest.is_empty() || rest.starts_with('/'))
    {
        return format!("/store-items{}", rest);
    }

    path.to_string()
}

/// Fallback handler for the gated router: everything not matched by an
/// explicit route is relayed to the upstream core API.
pub async fn relay(State(ctx): State<AppContext>, request: Request) -> Result<Response, AppError> {
    let method = request.method().clone();
    let path = rewrite_path(request.uri().path());
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let (parts, body) = request.into_parts();
    let upstream_response = ctx
        .upstream
        .forward(
            method,
            &path_and_query,
            &parts.headers,
            reqwest::Body::wrap_stream(body.into_data_stream()),
        )
        .await?;

    let status = upstream_response.status();
    let headers = upstream_response.headers().clone();

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        // Hop-by-hop headers do not survive the relay
        if name == header::CONNECTION || name == header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| AppError::internal(format!("failed to assemble relayed response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_store_alias() {
        assert_eq!(rewrite_path("/store"), "/store-items");
        assert_eq!(rewrite_path("/store/42"), "/store-items/42");
    }

    #[test]
    fn test_rewrite_leaves_other_paths_alone() {
        assert_eq!(rewrite_path("/tasks"), "/tasks");
        assert_eq!(rewrite_path("/storefront"), "/storefront");
    }
}
