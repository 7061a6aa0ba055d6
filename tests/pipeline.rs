//! End-to-end decisions from a TOML configuration.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use proxy_core::affinity::KeyProtector;
use proxy_core::config::loader::parse_config;
use proxy_core::health::ActiveHealth;
use proxy_core::{ForwardOutcome, ProxyConfig, ProxyPipeline, ProxyRequest, ProxyResponse, SnapshotStore};

const CONFIG: &str = r#"
[[routes]]
id = "route1"
cluster_id = "cluster1"
order = 10
match = { path = "/{**catchall}" }

[[routes]]
id = "route2"
cluster_id = "cluster1"
order = 1
match = { path = "/api/{plugin}/stuff/{*remainder}", methods = ["GET", "post"] }
transforms = [
    { PathPattern = "/foo/{plugin}/bar/{remainder}" },
    { RequestHeader = "clearMe", Set = "" },
    { "X-Forwarded" = "for,proto", Action = "Set" },
    { ResponseHeader = "X-Route", Set = "route2", When = "Always" },
]

[[clusters]]
id = "cluster1"
load_balancing_policy = "RoundRobin"

[clusters.session_affinity]
policy = "CustomHeader"
affinity_key_name = "X-MyAffinity"

[clusters.destinations.A]
address = "http://10.0.0.1:8080"

[clusters.destinations.B]
address = "http://10.0.0.2:8080"

[clusters.destinations.C]
address = "http://10.0.0.3:8080"

[session_affinity]
protection_key = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="
"#;

fn pipeline() -> ProxyPipeline {
    let config = parse_config(CONFIG).unwrap();
    let protector = KeyProtector::from_options(&config.session_affinity).unwrap();
    let store = Arc::new(SnapshotStore::from_config(&config).unwrap());
    ProxyPipeline::new(store, protector)
}

#[test]
fn test_route_match_and_transforms() {
    let pipeline = pipeline();
    let mut request = ProxyRequest::new(Method::GET, "/api/widgets/stuff/extra/path");
    request.headers.insert("clearme", "secret".parse().unwrap());
    request.headers.insert("x-forwarded-for", "6.6.6.6".parse().unwrap());
    request.remote_addr = Some("192.0.2.7:40000".parse().unwrap());

    let plan = pipeline.route(&request).unwrap();
    assert_eq!(plan.route().id(), "route2");
    assert_eq!(plan.route_values()["plugin"], "widgets");
    assert_eq!(plan.request.path, "/foo/widgets/bar/extra/path");
    assert!(plan.request.headers.get("clearme").is_none());
    assert_eq!(plan.request.headers["x-forwarded-for"], "192.0.2.7");
    assert_eq!(plan.request.headers["x-forwarded-proto"], "http");

    let mut response = ProxyResponse::new(StatusCode::BAD_GATEWAY);
    pipeline.complete(plan, ForwardOutcome::Success, Some(&mut response));
    assert_eq!(response.headers["x-route"], "route2");
}

#[test]
fn test_method_mismatch_falls_through_to_catch_all() {
    let pipeline = pipeline();
    let plan = pipeline
        .route(&ProxyRequest::new(Method::DELETE, "/api/widgets/stuff/x"))
        .unwrap();
    assert_eq!(plan.route().id(), "route1");
    assert_eq!(plan.request.path, "/api/widgets/stuff/x");
}

#[test]
fn test_encrypted_affinity_round_trip() {
    let pipeline = pipeline();

    let plan = pipeline.route(&ProxyRequest::new(Method::GET, "/home")).unwrap();
    let bound = plan.destination().id().to_string();
    let mut response = ProxyResponse::new(StatusCode::OK);
    pipeline.complete(plan, ForwardOutcome::Success, Some(&mut response));
    let key = response.headers["x-myaffinity"].clone();
    // encrypted, so the id is not visible in the key
    assert_ne!(key.to_str().unwrap(), bound);

    for _ in 0..5 {
        let mut request = ProxyRequest::new(Method::GET, "/home");
        request.headers.insert("x-myaffinity", key.clone());
        assert_eq!(pipeline.route(&request).unwrap().destination().id(), bound);
    }

    // bound destination goes down: redistribute to another one
    let snapshot = pipeline.store().current();
    snapshot
        .cluster("cluster1")
        .unwrap()
        .destination(&bound)
        .unwrap()
        .health()
        .set_active(ActiveHealth::Unhealthy);
    let mut request = ProxyRequest::new(Method::GET, "/home");
    request.headers.insert("x-myaffinity", key);
    let plan = pipeline.route(&request).unwrap();
    assert_ne!(plan.destination().id(), bound);

    let mut response = ProxyResponse::new(StatusCode::OK);
    let rebound = plan.destination().id().to_string();
    pipeline.complete(plan, ForwardOutcome::Success, Some(&mut response));
    let new_key = response.headers["x-myaffinity"].clone();
    let mut request = ProxyRequest::new(Method::GET, "/home");
    request.headers.insert("x-myaffinity", new_key);
    assert_eq!(pipeline.route(&request).unwrap().destination().id(), rebound);
}

#[test]
fn test_reload_keeps_health_and_rejects_bad_config() {
    let pipeline = pipeline();
    let store = pipeline.store().clone();
    store
        .current()
        .cluster("cluster1")
        .unwrap()
        .destination("A")
        .unwrap()
        .health()
        .set_active(ActiveHealth::Unhealthy);

    let config = parse_config(CONFIG).unwrap();
    store.publish(&config).unwrap();
    let a = store.current().cluster("cluster1").unwrap().destination("A").unwrap().clone();
    assert_eq!(a.health().active(), ActiveHealth::Unhealthy);

    let broken: ProxyConfig = toml::from_str(&CONFIG.replace("RoundRobin", "Fastest")).unwrap();
    let err = store.publish(&broken).unwrap_err();
    assert!(err.to_string().contains("Fastest"));
    assert_eq!(store.current().version(), 2);
}
