//! End-to-end scenarios against real listeners: stub origins, a fully wired
//! proxy (registry, transport pool, limiter, management API), and a real
//! outbound client driving it.
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use http_body_util::BodyExt;
use switchboard::{
    adapters::build_router,
    config::models::{ProxyConfig, RateLimiterConfig, TransportOptions},
    core::registry::Balancer,
    ports::http_client::HttpClient,
    Backend, FileStore, HealthChecker, HttpClientAdapter, ProxyService, RateLimiter,
    RoundRobinBalancer, TransportPool,
};
use tempfile::TempDir;

/// One stub origin. Every request to it is tallied and appended to the
/// shared dispatch order.
struct TestBackend {
    label: String,
    status: AtomicU16,
    hits: AtomicUsize,
    seen_forwarded_host: Mutex<Option<String>>,
    seen_origin_host: Mutex<Option<String>>,
    order: Arc<Mutex<Vec<String>>>,
}

impl TestBackend {
    fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn backend_handler(State(state): State<Arc<TestBackend>>, req: Request) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.order.lock().unwrap().push(state.label.clone());
    *state.seen_forwarded_host.lock().unwrap() = req
        .headers()
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.seen_origin_host.lock().unwrap() = req
        .headers()
        .get("x-origin-host")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, state.label.clone()).into_response()
}

async fn health_handler(State(state): State<Arc<TestBackend>>) -> Response {
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    status.into_response()
}

async fn spawn_backend(
    label: &str,
    status: u16,
    order: Arc<Mutex<Vec<String>>>,
) -> (SocketAddr, Arc<TestBackend>) {
    let state = Arc::new(TestBackend {
        label: label.to_string(),
        status: AtomicU16::new(status),
        hits: AtomicUsize::new(0),
        seen_forwarded_host: Mutex::new(None),
        seen_origin_host: Mutex::new(None),
        order,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .fallback(backend_handler)
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, state)
}

struct ProxyHarness {
    addr: SocketAddr,
    balancer: Arc<dyn Balancer>,
    limiter: Option<Arc<RateLimiter>>,
    storage_path: std::path::PathBuf,
    _storage_dir: TempDir,
}

struct HarnessOptions {
    max_retries: usize,
    max_backends: usize,
    limiter: Option<RateLimiterConfig>,
    health_interval: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_backends: 2,
            limiter: None,
            health_interval: None,
        }
    }
}

async fn spawn_proxy(backend_addrs: &[SocketAddr], options: HarnessOptions) -> ProxyHarness {
    let balancer: Arc<dyn Balancer> = Arc::new(RoundRobinBalancer::with_backends(
        backend_addrs
            .iter()
            .map(|addr| Backend::new(&format!("http://{addr}")).unwrap()),
    ));

    let proxy_config = ProxyConfig {
        max_retries: options.max_retries,
        max_backends: options.max_backends,
        connection_pool_size: 4,
        ..ProxyConfig::default()
    };
    let pool = Arc::new(TransportPool::new(&proxy_config).unwrap());
    let proxy = Arc::new(ProxyService::new(
        Arc::clone(&balancer),
        pool,
        &proxy_config,
    ));

    let storage_dir = TempDir::new().unwrap();
    let storage_path = storage_dir.path().join("buckets.json");

    let (limiter, header_ip) = match &options.limiter {
        Some(limiter_config) => {
            let store = Arc::new(FileStore::new(&storage_path).unwrap());
            let limiter = Arc::new(RateLimiter::new(limiter_config, store));
            limiter.start();
            (Some(limiter), limiter_config.header_ip.clone())
        }
        None => (None, String::new()),
    };

    if let Some(interval) = options.health_interval {
        let probe_client: Arc<dyn HttpClient> =
            Arc::new(HttpClientAdapter::new(&TransportOptions::default()).unwrap());
        let checker_config = switchboard::config::models::HealthCheckerConfig {
            interval,
            timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let checker = HealthChecker::new(Arc::clone(&balancer), probe_client, &checker_config);
        let shutdown = switchboard::GracefulShutdown::new();
        let token = shutdown.shutdown_token();
        tokio::spawn(async move {
            checker.run(token).await;
            drop(shutdown);
        });
    }

    let app = build_router(proxy, limiter.clone(), &header_ip);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    ProxyHarness {
        addr,
        balancer,
        limiter,
        storage_path,
        _storage_dir: storage_dir,
    }
}

async fn send(
    client: &HttpClientAdapter,
    method: Method,
    url: &str,
    headers: &[(&str, &str)],
    body: Body,
) -> (StatusCode, String) {
    let mut builder = hyper::Request::builder().method(method).uri(url);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(body).unwrap();

    let response = client
        .round_trip(request)
        .await
        .expect("proxy should be reachable");
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

fn driver() -> HttpClientAdapter {
    HttpClientAdapter::new(&TransportOptions::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requests_cycle_backends_in_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, b1) = spawn_backend("b1", 200, Arc::clone(&order)).await;
    let (addr2, b2) = spawn_backend("b2", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(&[addr1, addr2], HarnessOptions::default()).await;

    let client = driver();
    for _ in 0..3 {
        let (status, _) = send(
            &client,
            Method::GET,
            &format!("http://{}/x", harness.addr),
            &[],
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(*order.lock().unwrap(), ["b1", "b2", "b1"]);
    assert_eq!(b1.hits(), 2);
    assert_eq!(b2.hits(), 1);

    // The proxy stamped the original host on the outbound requests.
    let expected_host = harness.addr.to_string();
    assert_eq!(
        b1.seen_forwarded_host.lock().unwrap().as_deref(),
        Some(expected_host.as_str())
    );
    assert_eq!(
        b1.seen_origin_host.lock().unwrap().as_deref(),
        Some(expected_host.as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_backend_is_retired_after_retry_budget() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, b1) = spawn_backend("b1", 503, Arc::clone(&order)).await;
    let (addr2, b2) = spawn_backend("b2", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(&[addr1, addr2], HarnessOptions::default()).await;

    let client = driver();
    let url = format!("http://{}/x", harness.addr);

    // First request: b1 eats its retry budget, gets marked down, b2 answers.
    let (status, body) = send(&client, Method::GET, &url, &[], Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "b2");
    assert_eq!(b1.hits(), 2);

    // Second request goes straight to b2.
    let (status, _) = send(&client, Method::GET, &url, &[], Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(b1.hits(), 2);
    assert_eq!(b2.hits(), 2);

    let snapshot = harness.balancer.snapshot();
    assert!(snapshot[0].is_down());
    assert!(!snapshot[1].is_down());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_limited_client_gets_429() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, _b1) = spawn_backend("b1", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(
        &[addr1],
        HarnessOptions {
            limiter: Some(RateLimiterConfig {
                enabled: true,
                default_capacity: 2.0,
                default_rate: 0.0,
                ..RateLimiterConfig::default()
            }),
            ..HarnessOptions::default()
        },
    )
    .await;

    let client = driver();
    let url = format!("http://{}/", harness.addr);
    let c1 = [("x-api-key", "c1")];

    let (status, _) = send(&client, Method::GET, &url, &c1, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&client, Method::GET, &url, &c1, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&client, Method::GET, &url, &c1, Body::empty()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "Rate limit exceeded");

    // A different client still has its own budget.
    let (status, _) = send(
        &client,
        Method::GET,
        &url,
        &[("x-api-key", "c2")],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_management_api_crud_cycle() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, _b1) = spawn_backend("b1", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(
        &[addr1],
        HarnessOptions {
            limiter: Some(RateLimiterConfig {
                enabled: true,
                default_capacity: 100.0,
                default_rate: 0.0,
                ..RateLimiterConfig::default()
            }),
            ..HarnessOptions::default()
        },
    )
    .await;

    let client = driver();
    let base = format!("http://{}/api/clients", harness.addr);
    let json = [("content-type", "application/json")];
    let payload = r#"{"client_id":"c1","capacity":10,"rate_per_sec":1}"#;

    let (status, _) = send(&client, Method::POST, &base, &json, Body::from(payload)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&client, Method::POST, &base, &json, Body::from(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["code"], 409);

    let (status, body) = send(
        &client,
        Method::GET,
        &format!("{base}/c1"),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let client_info: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(client_info["client_id"], "c1");
    assert_eq!(client_info["capacity"], 10.0);
    assert_eq!(client_info["rate_per_sec"], 1.0);

    let (status, _) = send(
        &client,
        Method::DELETE,
        &format!("{base}/c1"),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &client,
        Method::GET,
        &format!("{base}/c1"),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["code"], 404);
    assert_eq!(error["message"], "Client not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_management_body_is_400() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, _b1) = spawn_backend("b1", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(
        &[addr1],
        HarnessOptions {
            limiter: Some(RateLimiterConfig {
                enabled: true,
                default_capacity: 100.0,
                default_rate: 0.0,
                ..RateLimiterConfig::default()
            }),
            ..HarnessOptions::default()
        },
    )
    .await;

    let client = driver();
    let (status, body) = send(
        &client,
        Method::POST,
        &format!("http://{}/api/clients", harness.addr),
        &[("content-type", "application/json")],
        Body::from("definitely not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["code"], 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_limits_survive_a_restart() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, _b1) = spawn_backend("b1", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(
        &[addr1],
        HarnessOptions {
            limiter: Some(RateLimiterConfig {
                enabled: true,
                default_capacity: 100.0,
                default_rate: 0.0,
                ..RateLimiterConfig::default()
            }),
            ..HarnessOptions::default()
        },
    )
    .await;

    let client = driver();
    let base = format!("http://{}/api/clients", harness.addr);
    let json = [("content-type", "application/json")];

    let (status, _) = send(
        &client,
        Method::POST,
        &base,
        &json,
        Body::from(r#"{"client_id":"c1","capacity":10,"rate_per_sec":1}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &client,
        Method::PUT,
        &format!("{base}/c1"),
        &json,
        Body::from(r#"{"capacity":5,"rate_per_sec":0.5}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Flush state and bring up a second limiter over the same file.
    harness.limiter.as_ref().unwrap().stop().await;

    let store = Arc::new(FileStore::new(&harness.storage_path).unwrap());
    let restarted = RateLimiter::new(&RateLimiterConfig::default(), store);
    assert_eq!(restarted.get_client("c1"), Some((5.0, 0.5)));
    assert!(restarted.allow("c1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_backends_failing_yields_502() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, b1) = spawn_backend("b1", 500, Arc::clone(&order)).await;
    let (addr2, b2) = spawn_backend("b2", 500, Arc::clone(&order)).await;
    let harness = spawn_proxy(&[addr1, addr2], HarnessOptions::default()).await;

    let client = driver();
    let (status, _) = send(
        &client,
        Method::GET,
        &format!("http://{}/x", harness.addr),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(b1.hits(), 2);
    assert_eq!(b2.hits(), 2);

    for backend in harness.balancer.snapshot() {
        assert!(backend.is_down());
    }

    // With every backend down, further requests fail fast.
    let (status, _) = send(
        &client,
        Method::GET,
        &format!("http://{}/x", harness.addr),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(b1.hits(), 2);
    assert_eq!(b2.hits(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_checker_revives_recovered_backend() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, b1) = spawn_backend("b1", 503, Arc::clone(&order)).await;
    let (addr2, _b2) = spawn_backend("b2", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(
        &[addr1, addr2],
        HarnessOptions {
            health_interval: Some(Duration::from_millis(50)),
            ..HarnessOptions::default()
        },
    )
    .await;

    let client = driver();
    let url = format!("http://{}/x", harness.addr);

    // b1 goes down, via the first probe or the retrying transport.
    let (status, _) = send(&client, Method::GET, &url, &[], Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(harness.balancer.snapshot()[0].is_down());

    // Backend recovers; the health checker should notice.
    b1.set_status(200);
    let hits_when_down = b1.hits();

    let mut revived = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (status, _) = send(&client, Method::GET, &url, &[], Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        if b1.hits() > hits_when_down {
            revived = true;
            break;
        }
    }
    assert!(revived, "b1 should rejoin the rotation after recovering");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_post_body_reaches_backend_after_retries() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (addr1, b1) = spawn_backend("b1", 502, Arc::clone(&order)).await;
    let (addr2, b2) = spawn_backend("b2", 200, Arc::clone(&order)).await;
    let harness = spawn_proxy(&[addr1, addr2], HarnessOptions::default()).await;

    let client = driver();
    let (status, body) = send(
        &client,
        Method::POST,
        &format!("http://{}/submit", harness.addr),
        &[("content-type", "application/json")],
        Body::from(r#"{"value":1}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "b2");
    assert_eq!(b1.hits(), 2);
    assert_eq!(b2.hits(), 1);
}
