//! End-to-end health monitoring against real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use lattice_registry::{RegistryConfig, ServiceInfo, ServiceRegistry, ServiceStatus};

/// Minimal HTTP server answering every request with a fixed response.
async fn spawn_http_server(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

/// A socket that accepts connections but never responds, so probes
/// against it run into the timeout.
async fn spawn_black_hole() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });
    addr
}

fn registry(probe_timeout: Duration) -> ServiceRegistry {
    ServiceRegistry::new(RegistryConfig {
        check_interval: Duration::from_millis(50),
        probe_timeout,
    })
}

fn service_at(name: &str, addr: SocketAddr, tags: &[&str]) -> ServiceInfo {
    ServiceInfo::new(name, addr.ip().to_string(), addr.port()).with_tags(tags.iter().copied())
}

#[tokio::test]
async fn one_cycle_separates_responsive_from_stuck_services() {
    let good_a = spawn_http_server("200 OK", r#"{"status":"ok"}"#).await;
    let good_b = spawn_http_server("200 OK", r#"{"status":"ok"}"#).await;
    let stuck = spawn_black_hole().await;

    let reg = registry(Duration::from_millis(200));
    reg.register(service_at("alpha", good_a, &["ai"]));
    reg.register(service_at("beta", good_b, &["ai"]));
    reg.register(service_at("gamma", stuck, &["ai"]));

    let (healthy, total) = reg.check_now().await;
    assert_eq!(total, 3);
    assert_eq!(healthy, 2);

    let names: Vec<String> = reg
        .get_healthy(None)
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let gamma = reg.get_health("gamma").unwrap();
    assert_eq!(gamma.status, ServiceStatus::Unhealthy);
    assert_eq!(gamma.error_message.as_deref(), Some("health check timeout"));
    assert_eq!(gamma.consecutive_failures, 1);
}

#[tokio::test]
async fn healthy_payload_metadata_is_folded_into_the_record() {
    let addr = spawn_http_server("200 OK", r#"{"status":"ok","version":"3.2","queue_depth":4}"#)
        .await;

    let reg = registry(Duration::from_millis(500));
    reg.register(service_at("embed", addr, &[]));
    reg.check_now().await;

    let health = reg.get_health("embed").unwrap();
    assert_eq!(health.status, ServiceStatus::Healthy);
    assert!(health.last_check.is_some());
    assert!(health.response_time_ms > 0.0);
    assert_eq!(health.metadata.get("version"), Some(&serde_json::json!("3.2")));
    assert_eq!(
        health.metadata.get("queue_depth"),
        Some(&serde_json::json!(4))
    );
}

#[tokio::test]
async fn repeated_bad_status_degrades_then_counts_failures() {
    let addr = spawn_http_server("500 Internal Server Error", "").await;

    let reg = registry(Duration::from_millis(500));
    reg.register(service_at("flaky", addr, &[]));

    for _ in 0..3 {
        reg.check_now().await;
    }

    let health = reg.get_health("flaky").unwrap();
    assert_eq!(health.status, ServiceStatus::Degraded);
    assert_eq!(health.consecutive_failures, 3);
    assert_eq!(health.error_message.as_deref(), Some("HTTP 500"));
    assert!(reg.get_healthy(None).is_empty());
}

#[tokio::test]
async fn monitor_loop_runs_cycles_and_stops_cleanly() {
    let addr = spawn_http_server("200 OK", r#"{"status":"ok"}"#).await;

    let reg = registry(Duration::from_millis(200));
    reg.register(service_at("alpha", addr, &["ai"]));

    reg.start();
    // Let the first cycle land.
    tokio::time::sleep(Duration::from_millis(150)).await;
    reg.stop().await;

    let health = reg.get_health("alpha").unwrap();
    assert_eq!(health.status, ServiceStatus::Healthy);
    assert_eq!(reg.get_healthy(Some("ai")).len(), 1);
}

#[tokio::test]
async fn load_balancing_follows_health_changes() {
    let good_a = spawn_http_server("200 OK", "{}").await;
    let good_b = spawn_http_server("200 OK", "{}").await;
    let down = spawn_black_hole().await;

    let reg = registry(Duration::from_millis(200));
    reg.register(service_at("a", good_a, &["ai"]));
    reg.register(service_at("b", good_b, &["ai"]));
    reg.register(service_at("c", down, &["ai"]));
    reg.check_now().await;

    // Two healthy candidates; two consecutive selections cover both.
    let first = reg.select_for_load_balancing("ai").unwrap().name;
    let second = reg.select_for_load_balancing("ai").unwrap().name;
    assert_ne!(first, second);
    assert!(["a", "b"].contains(&first.as_str()));
    assert!(["a", "b"].contains(&second.as_str()));
}
