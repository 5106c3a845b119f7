use axum::body::{to_bytes, Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceExt;

use gatehouse::config::GatehouseConfig;
use gatehouse::http::{HttpServer, Upstream};
use gatehouse::ratelimit::{ClientKey, ForwardedPolicy, LimitConfig, ManualClock, RateLimiter};

const REJECTION_BODY: &str = r#"{"error":"Too many requests. Please try again later."}"#;

fn request_from(peer: &str, forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/health");
    if let Some(value) = forwarded_for {
        builder = builder.header("x-forwarded-for", value);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

fn gate_router(limiter: Arc<RateLimiter>, policy: ForwardedPolicy) -> Router {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    HttpServer::new(addr, limiter, policy).router()
}

fn gate_router_with_upstream(limiter: Arc<RateLimiter>, upstream: Upstream) -> Router {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    HttpServer::new(addr, limiter, ForwardedPolicy::TrustAll)
        .with_upstream(Some(upstream))
        .router()
}

#[tokio::test]
async fn test_hundred_requests_then_rejection() {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_clock(LimitConfig::default(), clock.clone()));
    let router = gate_router(limiter, ForwardedPolicy::TrustAll);

    for i in 1..=100 {
        clock.advance(Duration::from_millis(100));
        let response = router
            .clone()
            .oneshot(request_from("10.0.0.1:50000", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "Request {} should be admitted", i);
    }

    let response = router
        .oneshot(request_from("10.0.0.1:50000", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(std::str::from_utf8(&body).unwrap(), REJECTION_BODY);
}

#[tokio::test]
async fn test_window_rollover_readmits_client() {
    let clock = Arc::new(ManualClock::new());
    let limits = LimitConfig {
        limit: 2,
        ..LimitConfig::default()
    };
    let limiter = Arc::new(RateLimiter::with_clock(limits, clock.clone()));
    let router = gate_router(limiter.clone(), ForwardedPolicy::TrustAll);

    for _ in 0..2 {
        router.clone().oneshot(request_from("10.0.0.1:50000", None)).await.unwrap();
    }
    let denied = router.clone().oneshot(request_from("10.0.0.1:50000", None)).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(61));

    let admitted = router.oneshot(request_from("10.0.0.1:50000", None)).await.unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(limiter.counter_value(&ClientKey::from("10.0.0.1")), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_requests_from_one_client() {
    let limiter = Arc::new(RateLimiter::new(LimitConfig::default()));
    let router = gate_router(limiter.clone(), ForwardedPolicy::TrustAll);

    let tasks: Vec<_> = (0..200)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .oneshot(request_from("10.0.0.1:50000", None))
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let mut admitted = 0;
    let mut denied = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => denied += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(admitted, 100);
    assert_eq!(denied, 100);
}

#[tokio::test]
async fn test_clients_are_independent() {
    let limits = LimitConfig {
        limit: 1,
        ..LimitConfig::default()
    };
    let limiter = Arc::new(RateLimiter::new(limits));
    let router = gate_router(limiter, ForwardedPolicy::TrustAll);

    router.clone().oneshot(request_from("10.0.0.1:50000", None)).await.unwrap();
    let other = router
        .clone()
        .oneshot(request_from("10.0.0.2:50000", None))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    let repeat = router.oneshot(request_from("10.0.0.1:50000", None)).await.unwrap();
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_header_precedence() {
    let limiter = Arc::new(RateLimiter::new(LimitConfig::default()));
    let router = gate_router(limiter.clone(), ForwardedPolicy::TrustAll);

    router
        .oneshot(request_from("9.9.9.9:50000", Some("1.2.3.4, 5.6.7.8")))
        .await
        .unwrap();

    assert_eq!(limiter.counter_value(&ClientKey::from("1.2.3.4")), Some(1));
    assert_eq!(limiter.counter_count(), 1);
}

#[tokio::test]
async fn test_trusted_proxies_from_config() {
    let yaml = r#"
rate_limiting:
  max_requests: 1
  forwarded_for: trusted_proxies
  trusted_proxies: [10.0.0.254]
"#;
    let config = GatehouseConfig::from_yaml(yaml).unwrap();
    let limiter = Arc::new(RateLimiter::new(config.rate_limiting.limit_config()));
    let router = gate_router(limiter.clone(), config.rate_limiting.forwarded_policy());

    // A direct caller rotating the header is still counted by its own address
    for spoofed in ["1.1.1.1", "2.2.2.2"] {
        router
            .clone()
            .oneshot(request_from("9.9.9.9:50000", Some(spoofed)))
            .await
            .unwrap();
    }
    assert_eq!(limiter.counter_value(&ClientKey::from("9.9.9.9")), Some(2));

    let via_proxy = router
        .oneshot(request_from("10.0.0.254:50000", Some("1.1.1.1")))
        .await
        .unwrap();
    assert_eq!(via_proxy.status(), StatusCode::OK);
    assert_eq!(limiter.counter_value(&ClientKey::from("1.1.1.1")), Some(1));
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/api/applications", post(|body: String| async move { format!("echo:{}", body) }))
        .route("/api/companies", get(|| async { (StatusCode::CREATED, "created") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_admitted_requests_reach_upstream_over_http() {
    let upstream_addr = spawn_upstream().await;
    let upstream = Upstream::new(&format!("http://{}", upstream_addr), 1024).unwrap();

    let limits = LimitConfig {
        limit: 2,
        ..LimitConfig::default()
    };
    let limiter = Arc::new(RateLimiter::new(limits));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gate_addr = listener.local_addr().unwrap();
    let server = HttpServer::new(gate_addr, limiter, ForwardedPolicy::TrustAll)
        .with_upstream(Some(upstream));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let served = tokio::spawn(server.serve_listener(listener, async move {
        let _ = shutdown_rx.await;
    }));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let response = client
        .post(format!("http://{}/api/applications", gate_addr))
        .header("x-forwarded-for", "10.0.0.1")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "echo:hello");

    let response = client
        .get(format!("http://{}/api/companies", gate_addr))
        .header("x-forwarded-for", "10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = client
        .get(format!("http://{}/api/companies", gate_addr))
        .header("x-forwarded-for", "10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.text().await.unwrap(), REJECTION_BODY);

    shutdown_tx.send(()).unwrap();
    served.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_body_rejected_before_upstream() {
    let upstream_addr = spawn_upstream().await;
    let upstream = Upstream::new(&format!("http://{}", upstream_addr), 4).unwrap();
    let limiter = Arc::new(RateLimiter::new(LimitConfig::default()));
    let router = gate_router_with_upstream(limiter, upstream);

    let mut request = Request::builder()
        .method("POST")
        .uri("/api/applications")
        .body(Body::from("far too long"))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("10.0.0.1:50000".parse::<SocketAddr>().unwrap()));

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let upstream = Upstream::new(&format!("http://{}", dead_addr), 1024).unwrap();
    let limiter = Arc::new(RateLimiter::new(LimitConfig::default()));
    let router = gate_router_with_upstream(limiter, upstream);

    // Built-in routes are still served locally
    let response = router
        .clone()
        .oneshot(request_from("10.0.0.1:50000", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut request = Request::builder().uri("/api/interviews").body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("10.0.0.1:50000".parse::<SocketAddr>().unwrap()));
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_broken_body_is_bad_request() {
    let upstream_addr = spawn_upstream().await;
    let upstream = Upstream::new(&format!("http://{}", upstream_addr), 1024).unwrap();
    let limiter = Arc::new(RateLimiter::new(LimitConfig::default()));
    let router = gate_router_with_upstream(limiter, upstream);

    // Client goes away after the first chunk
    let chunks = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"he")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
    ]);
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/applications")
        .body(Body::from_stream(chunks))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("10.0.0.1:50000".parse::<SocketAddr>().unwrap()));

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
