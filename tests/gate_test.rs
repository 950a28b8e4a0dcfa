// End-to-end tests for the request-shaping gate: a real gateway instance
// in front of a stub upstream, driven over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{Json, Router, extract::Request};
use serde_json::{Value, json};

use mobile_gateway::bridge::upstream::{UpstreamConnector, UpstreamSession};
use mobile_gateway::config::{Config, CorsConfig, GateConfig, RetryPolicy, UpstreamConfig};
use mobile_gateway::context::AppContext;
use mobile_gateway::error::AppError;
use mobile_gateway::gate::RequestShapingGate;
use mobile_gateway::proxy::PassThroughClient;

struct NoopConnector;

#[async_trait]
impl UpstreamConnector for NoopConnector {
    async fn connect(&self, _credential: Option<&str>) -> Result<UpstreamSession, AppError> {
        Ok(UpstreamSession::detached())
    }
}

/// Stub core API: counts every request it actually receives and echoes
/// the running count, so cache hits are distinguishable from relays.
async fn spawn_upstream() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_handler = hits.clone();

    let app = Router::new().fallback(move |request: Request| {
        let hits = hits_for_handler.clone();
        async move {
            let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
            let path = request.uri().path().to_string();
            let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            Json(json!({ "hits": n, "path": path, "received": body.len() }))
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), hits)
}

async fn spawn_gateway(base_url: String, gate: GateConfig) -> String {
    let config = Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        mount_prefix: "/mobile-bff".to_string(),
        upstream: UpstreamConfig {
            base_url: base_url.clone(),
            events_url: "ws://127.0.0.1:1".to_string(),
            timeout_secs: 5,
            retry: RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(10),
            },
        },
        gate: gate.clone(),
        cors: CorsConfig {
            allowed_origins: vec![],
        },
    };

    let gate = RequestShapingGate::new(gate);
    let upstream = PassThroughClient::new(base_url, 5);
    let ctx = AppContext::new(config, gate, upstream, Arc::new(NoopConnector));
    let app = mobile_gateway::build_router(ctx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{}", addr)
}

fn gate_config(window: Duration, ceiling: usize, cache_ttl: Duration) -> GateConfig {
    GateConfig {
        window,
        ceiling,
        whitelist_prefixes: vec!["/auth/".to_string()],
        cache_ttl,
        sweep_interval: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn test_denies_requests_over_ceiling_with_retry_hint() {
    let (upstream_url, _) = spawn_upstream().await;
    // Cache disabled so every request reaches the ledger
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 5, Duration::ZERO),
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let response = client
            .get(format!("{}/mobile-bff/tasks", gateway))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = client
        .get(format!("{}/mobile-bff/tasks", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "error");
    let retry_after = body["retryAfter"].as_u64().expect("retryAfter is a number");
    assert!(retry_after >= 1 && retry_after <= 60);
}

#[tokio::test]
async fn test_cache_hit_replays_response_without_ledger_charge() {
    let (upstream_url, hits) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 2, Duration::from_secs(5)),
    )
    .await;
    let client = reqwest::Client::new();

    // Three identical requests: one relay, two replays of the same body
    for _ in 0..3 {
        let response = client
            .get(format!("{}/mobile-bff/tasks", gateway))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["hits"], 1);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The ledger only counted the first /tasks request, so a second
    // distinct path is still admitted under ceiling 2...
    let response = client
        .get(format!("{}/mobile-bff/meals", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // ...and a third distinct path is the one that trips the ceiling
    let response = client
        .get(format!("{}/mobile-bff/quests", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn test_whitelisted_paths_are_never_limited_or_cached() {
    let (upstream_url, hits) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 2, Duration::from_secs(5)),
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..20 {
        let response = client
            .post(format!("{}/mobile-bff/auth/login", gateway))
            .json(&json!({ "email": "a@b.c" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // Every call reached the upstream: no caching, no denial
    assert_eq!(hits.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn test_identity_readmitted_after_window_elapses() {
    let (upstream_url, _) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_millis(500), 1, Duration::ZERO),
    )
    .await;
    let client = reqwest::Client::new();
    let url = format!("{}/mobile-bff/tasks", gateway);

    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 429);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
}

#[tokio::test]
async fn test_store_alias_is_rewritten_for_upstream() {
    let (upstream_url, _) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 100, Duration::ZERO),
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mobile-bff/store/42", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["path"], "/store-items/42");
}

#[tokio::test]
async fn test_large_success_response_is_relayed_verbatim() {
    // An upstream response too big to buffer for the cache must still
    // reach the client untouched
    let payload = vec![b'x'; 3 * 1024 * 1024];
    let body_for_handler = payload.clone();
    let app = Router::new().fallback(move || {
        let body = body_for_handler.clone();
        async move { body }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 5, Duration::from_secs(5)),
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/mobile-bff/export", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), payload.len());
    assert_eq!(&body[..], &payload[..]);
}

#[tokio::test]
async fn test_oversized_upload_is_relayed_and_ledger_charged() {
    let (upstream_url, hits) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 2, Duration::from_secs(5)),
    )
    .await;
    let client = reqwest::Client::new();
    let big = vec![b'x'; 3 * 1024 * 1024];

    // Two identical oversized uploads both reach the upstream: too big to
    // fingerprint so the cache never engages, but the ledger still counts
    for expected_hits in 1..=2 {
        let response = client
            .post(format!("{}/mobile-bff/tasks", gateway))
            .body(big.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(hits.load(Ordering::SeqCst), expected_hits);
    }

    // The third request over ceiling 2 trips admission control
    let response = client
        .get(format!("{}/mobile-bff/tasks", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn test_health_endpoints_sit_outside_the_gate() {
    let (upstream_url, hits) = spawn_upstream().await;
    let gateway = spawn_gateway(
        upstream_url,
        gate_config(Duration::from_secs(60), 1, Duration::ZERO),
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let response = client
            .get(format!("{}/health", gateway))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "mobile-gateway");
    }

    // Health never touched the upstream or the ledger
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
