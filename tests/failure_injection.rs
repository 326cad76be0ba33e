//! Failure injection tests for the gateway, over real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_gateway::config::GatewayConfig;
use edge_gateway::resilience::CircuitState;
use edge_gateway::routing::RouteRule;
use serde_json::Value;

mod common;

fn route_to(config: &mut GatewayConfig, service: &str, addrs: &[SocketAddr], retries: u32) {
    let list = addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(",");
    config.discovery.services.insert(service.to_string(), list);
    let mut rule = RouteRule::to_service("ANY", "/*", service);
    rule.id = "r1".into();
    rule.retry_count = retries;
    config.routes.push(rule);
}

fn counting_backend_script(
    calls: Arc<AtomicU32>,
    fail_first: u32,
    failure: u16,
) -> impl Fn(String) -> std::future::Ready<(u16, String)> + Send + Sync + 'static {
    move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < fail_first {
            std::future::ready((failure, "failing".to_string()))
        } else {
            std::future::ready((200, "Success".to_string()))
        }
    }
}

#[tokio::test]
async fn test_retry_on_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let script = counting_backend_script(calls.clone(), 2, 503);
    let backend = common::start_programmable_backend(script).await;

    let mut config = common::test_config();
    route_to(&mut config, "web", &[backend], 2);
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/orders")).send().await.expect("Gateway unreachable");
    assert_eq!(res.status(), 200, "Should eventually succeed after retries");
    assert_eq!(res.text().await.unwrap(), "Success");
    assert_eq!(calls.load(Ordering::SeqCst), 3, "One attempt plus two retries");
}

#[tokio::test]
async fn test_exhausted_retries_return_bad_gateway() {
    let calls = Arc::new(AtomicU32::new(0));
    let script = counting_backend_script(calls.clone(), u32::MAX, 500);
    let backend = common::start_programmable_backend(script).await;

    let mut config = common::test_config();
    route_to(&mut config, "web", &[backend], 1);
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_unavailable");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_errors_pass_through_without_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let script = counting_backend_script(calls.clone(), u32::MAX, 404);
    let backend = common::start_programmable_backend(script).await;

    let mut config = common::test_config();
    route_to(&mut config, "web", &[backend], 3);
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/missing")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_move_to_the_next_instance() {
    let dead = common::closed_port().await;
    let alive = common::start_mock_backend("alive").await;

    let mut config = common::test_config();
    route_to(&mut config, "web", &[dead, alive], 1);
    let gw = common::start_gateway(config).await;

    let client = common::client();
    for _ in 0..4 {
        let res = client.get(gw.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "alive");
    }
}

#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let calls = Arc::new(AtomicU32::new(0));
    let script = counting_backend_script(calls.clone(), u32::MAX, 500);
    let backend = common::start_programmable_backend(script).await;

    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.reset_timeout_ms = 60_000;
    route_to(&mut config, "web", &[backend], 0);
    let gw = common::start_gateway(config).await;

    let client = common::client();
    for _ in 0..3 {
        let res = client.get(gw.url("/")).send().await.unwrap();
        assert_eq!(res.status(), 502);
    }

    let res = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");

    assert_eq!(calls.load(Ordering::SeqCst), 3, "Open circuit must not reach the backend");
    let status = gw.gateway.breakers().status("web").unwrap();
    assert_eq!(status.state, CircuitState::Open);
    assert!(status.total_rejections >= 1);
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open() {
    let calls = Arc::new(AtomicU32::new(0));
    let script = counting_backend_script(calls.clone(), 2, 500);
    let backend = common::start_programmable_backend(script).await;

    let mut config = common::test_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.reset_timeout_ms = 200;
    config.circuit_breaker.success_threshold = 1;
    route_to(&mut config, "web", &[backend], 0);
    let gw = common::start_gateway(config).await;

    let client = common::client();
    for _ in 0..2 {
        assert_eq!(client.get(gw.url("/")).send().await.unwrap().status(), 502);
    }
    assert_eq!(client.get(gw.url("/")).send().await.unwrap().status(), 503);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let res = client.get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200, "Trial request should be admitted and succeed");
    assert_eq!(gw.gateway.breakers().status("web").unwrap().state, CircuitState::Closed);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let backend = common::start_slow_backend(Duration::from_millis(800)).await;

    let mut config = common::test_config();
    route_to(&mut config, "web", &[backend], 0);
    config.routes[0].timeout_ms = 100;
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_timeout");
}

#[tokio::test]
async fn test_unknown_service_has_no_healthy_instance() {
    let mut config = common::test_config();
    config.routes.push(RouteRule::to_service("GET", "/ghost", "ghost"));
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/ghost")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "no_healthy_instance");
    assert!(gw.gateway.breakers().status("ghost").is_none(), "No attempt, no breaker state");
}

#[tokio::test]
async fn test_fixed_upstream_url() {
    let backend = common::start_programmable_backend(|head: String| async move {
        let line = head.lines().next().unwrap_or_default().to_string();
        (200, line)
    })
    .await;

    let mut config = common::test_config();
    let mut rule = RouteRule::to_url("GET", "/legacy/*", &format!("http://{}/v1", backend));
    rule.id = "legacy".into();
    rule.strip_prefix = true;
    config.routes.push(rule);
    let gw = common::start_gateway(config).await;

    let res = common::client().get(gw.url("/legacy/items?page=2")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "GET /v1/items?page=2 HTTP/1.1");
}
