//! Discovery backends against mock registry and discovery services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use edge_gateway::config::{HttpPollingConfig, RegistryConfig};
use edge_gateway::discovery::{
    DiscoveryBackend, DiscoveryError, Health, HttpPollDiscovery, RegistryDiscovery, ServiceInstance,
};

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

// ---- registry agent ----

#[derive(Clone, Default)]
struct Agent {
    registered: Arc<Mutex<Vec<Value>>>,
    deregistered: Arc<Mutex<Vec<String>>>,
}

async fn health(Path(service): Path<String>) -> impl IntoResponse {
    if service == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "agent unavailable").into_response();
    }
    Json(json!([
        {
            "Node": {"Address": "10.0.0.10"},
            "Service": {"ID": "orders-1", "Service": "orders", "Address": "10.0.0.1", "Port": 9001,
                        "Tags": ["blue"], "Meta": {"zone": "a"}},
            "Checks": [{"Status": "passing"}, {"Status": "passing"}]
        },
        {
            "Node": {"Address": "10.0.0.20"},
            "Service": {"ID": "orders-2", "Service": "orders", "Address": "", "Port": 9002},
            "Checks": [{"Status": "passing"}, {"Status": "critical"}]
        },
        {
            "Node": {"Address": "10.0.0.30"},
            "Service": {"ID": "orders-3", "Service": "orders", "Address": "10.0.0.3", "Port": 9003,
                        "Tags": null},
            "Checks": [{"Status": "warning"}]
        }
    ]))
    .into_response()
}

async fn register(State(agent): State<Agent>, Json(body): Json<Value>) -> StatusCode {
    agent.registered.lock().unwrap().push(body);
    StatusCode::OK
}

async fn deregister(State(agent): State<Agent>, Path(id): Path<String>) -> StatusCode {
    agent.deregistered.lock().unwrap().push(id);
    StatusCode::OK
}

async fn start_agent() -> (Agent, RegistryDiscovery) {
    let agent = Agent::default();
    let router = Router::new()
        .route("/v1/health/service/{service}", get(health))
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/{id}", put(deregister))
        .with_state(agent.clone());
    let addr = serve(router).await;

    let config = RegistryConfig {
        address: addr.to_string(),
        ..RegistryConfig::default()
    };
    (agent, RegistryDiscovery::new(config).unwrap())
}

#[tokio::test]
async fn test_registry_maps_health_and_addresses() {
    let (_, backend) = start_agent().await;

    let instances = backend.discover("orders").await.unwrap();
    assert_eq!(instances.len(), 3);

    assert_eq!(instances[0].address, "10.0.0.1");
    assert_eq!(instances[0].health, Health::Passing);
    assert!(instances[0].tags.contains("blue"));
    assert_eq!(instances[0].metadata["zone"], "a");

    assert_eq!(instances[1].address, "10.0.0.20", "Empty service address falls back to node");
    assert_eq!(instances[1].health, Health::Critical);
    assert_eq!(instances[2].health, Health::Warning);

    let healthy = backend.healthy_instances("orders").await.unwrap();
    let ids: Vec<&str> = healthy.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["orders-1"]);
}

#[tokio::test]
async fn test_registry_register_submits_check() {
    let (agent, backend) = start_agent().await;

    let mut instance = ServiceInstance::new("orders-9", "orders", "10.0.0.9", 9009);
    instance.tags.insert("canary".into());
    backend.register(instance).await.unwrap();

    let registered = agent.registered.lock().unwrap().clone();
    assert_eq!(registered.len(), 1);
    let payload = &registered[0];
    assert_eq!(payload["ID"], "orders-9");
    assert_eq!(payload["Name"], "orders");
    assert_eq!(payload["Port"], 9009);
    assert_eq!(payload["Tags"], json!(["canary"]));
    assert_eq!(payload["Check"]["HTTP"], "http://10.0.0.9:9009/health");
    assert_eq!(payload["Check"]["Interval"], "10s");
    assert_eq!(payload["Check"]["DeregisterCriticalServiceAfter"], "60s");

    backend.deregister("orders-9").await.unwrap();
    assert_eq!(*agent.deregistered.lock().unwrap(), vec!["orders-9".to_string()]);
}

#[tokio::test]
async fn test_registry_error_status_is_transport_error() {
    let (_, backend) = start_agent().await;
    let err = backend.discover("broken").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Transport(_)), "got {:?}", err);
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_registry_unreachable_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = RegistryDiscovery::new(RegistryConfig {
        address: addr.to_string(),
        request_timeout_ms: 500,
        ..RegistryConfig::default()
    })
    .unwrap();
    assert!(backend.discover("orders").await.unwrap_err().is_transport());
}

// ---- HTTP polling ----

#[derive(Clone, Default)]
struct House {
    hits: Arc<AtomicU32>,
    failing: Arc<AtomicBool>,
}

async fn catalog(State(house): State<House>) -> impl IntoResponse {
    house.hits.fetch_add(1, Ordering::SeqCst);
    if house.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "orders": [
            {"id": "o1", "address": "127.0.0.1", "port": 9001, "status": "healthy"},
            {"id": "o2", "address": "127.0.0.1", "port": 9002, "status": "unhealthy"}
        ],
        "billing": {"address": "127.0.0.1", "port": 7000, "status": "healthy"}
    }))
    .into_response()
}

async fn start_house(poll_interval_secs: u64) -> (House, Arc<HttpPollDiscovery>) {
    let house = House::default();
    let router = Router::new()
        .route("/services", get(catalog))
        .with_state(house.clone());
    let addr = serve(router).await;

    let config = HttpPollingConfig {
        base_url: format!("http://{}", addr),
        poll_interval_secs,
        ..HttpPollingConfig::default()
    };
    (house, Arc::new(HttpPollDiscovery::new(config).unwrap()))
}

#[tokio::test]
async fn test_polling_disabled_fetches_on_demand() {
    let (house, backend) = start_house(0).await;
    backend.start();
    assert!(!backend.is_polling());

    let orders = backend.discover("orders").await.unwrap();
    assert_eq!(orders.len(), 2);
    let billing = backend.discover("billing").await.unwrap();
    assert_eq!(billing[0].id, "127.0.0.1:7000");
    assert_eq!(house.hits.load(Ordering::SeqCst), 2);

    let healthy = backend.healthy_instances("orders").await.unwrap();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].id, "o1");

    assert!(backend.discover("unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_poller_serves_snapshot_and_stops_on_close() {
    let (house, backend) = start_house(60).await;
    backend.start();
    assert!(backend.is_polling());

    // The first tick fires immediately; discover also covers the race.
    let orders = backend.discover("orders").await.unwrap();
    assert_eq!(orders.len(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let hits = house.hits.load(Ordering::SeqCst);
    backend.discover("orders").await.unwrap();
    backend.discover("billing").await.unwrap();
    assert_eq!(house.hits.load(Ordering::SeqCst), hits, "Lookups read the snapshot");

    backend.close().await.unwrap();
    assert!(!backend.is_polling());
}

#[tokio::test]
async fn test_failed_refresh_surfaces_until_recovery() {
    // Not started: only explicit refreshes touch the snapshot.
    let (house, backend) = start_house(60).await;
    backend.refresh().await.unwrap();

    house.failing.store(true, Ordering::SeqCst);
    assert!(backend.refresh().await.unwrap_err().is_transport());
    assert!(backend.discover("orders").await.unwrap_err().is_transport());

    house.failing.store(false, Ordering::SeqCst);
    backend.refresh().await.unwrap();
    assert_eq!(backend.discover("orders").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_registration_is_accepted_and_ignored() {
    let (house, backend) = start_house(0).await;
    backend
        .register(ServiceInstance::new("x", "orders", "127.0.0.1", 1))
        .await
        .unwrap();
    backend.deregister("x").await.unwrap();
    assert_eq!(house.hits.load(Ordering::SeqCst), 0);
    assert_eq!(backend.discover("orders").await.unwrap().len(), 2);
}
