//! Health state machine and background monitor loop.
//!
//! Each cycle fans out one probe per registered service, applies the
//! transition rule to every result, and logs an aggregate healthy/total
//! count. One service's probe failure never aborts the cycle for the
//! others, and all of a cycle's probes settle before the next interval
//! sleep begins.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::probe::{ProbeReport, http_probe};
use crate::registry::RegistryInner;
use crate::types::{ServiceHealth, ServiceStatus};

/// Uptime gained per healthy check.
const UPTIME_RECOVERY_STEP: f64 = 1.0;
/// Uptime lost per failed check; larger than the recovery step so
/// failures erode trust faster than successes rebuild it.
const UPTIME_DECAY_STEP: f64 = 2.0;
/// Pause after an unexpected cycle failure before the loop retries.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Apply one probe result to a service's health record.
///
/// - 2xx → `healthy`, failure counter reset, uptime `+1` (capped at 100)
/// - non-2xx → `degraded`, counter incremented, uptime `-2` (floored at 0)
/// - timeout / connection error → `unhealthy`, same as degraded otherwise
///
/// The first-ever check leaves the uptime estimate untouched.
pub(crate) fn transition(prev: &ServiceHealth, report: &ProbeReport) -> ServiceHealth {
    let now = epoch_secs();
    let mut next = match report {
        ProbeReport::Ok {
            latency_ms,
            metadata,
        } => ServiceHealth {
            status: ServiceStatus::Healthy,
            last_check: Some(now),
            response_time_ms: *latency_ms,
            error_message: None,
            consecutive_failures: 0,
            uptime_percentage: prev.uptime_percentage,
            metadata: metadata.clone(),
        },
        ProbeReport::BadStatus { latency_ms, status } => ServiceHealth {
            status: ServiceStatus::Degraded,
            last_check: Some(now),
            response_time_ms: *latency_ms,
            error_message: Some(format!("HTTP {status}")),
            consecutive_failures: prev.consecutive_failures + 1,
            uptime_percentage: prev.uptime_percentage,
            metadata: prev.metadata.clone(),
        },
        ProbeReport::TimedOut { latency_ms } => ServiceHealth {
            status: ServiceStatus::Unhealthy,
            last_check: Some(now),
            response_time_ms: *latency_ms,
            error_message: Some("health check timeout".to_string()),
            consecutive_failures: prev.consecutive_failures + 1,
            uptime_percentage: prev.uptime_percentage,
            metadata: prev.metadata.clone(),
        },
        ProbeReport::Failed { error } => ServiceHealth {
            status: ServiceStatus::Unhealthy,
            last_check: Some(now),
            response_time_ms: 0.0,
            error_message: Some(error.clone()),
            consecutive_failures: prev.consecutive_failures + 1,
            uptime_percentage: prev.uptime_percentage,
            metadata: prev.metadata.clone(),
        },
    };

    if prev.last_check.is_some() {
        next.uptime_percentage = if next.status == ServiceStatus::Healthy {
            (prev.uptime_percentage + UPTIME_RECOVERY_STEP).min(100.0)
        } else {
            (prev.uptime_percentage - UPTIME_DECAY_STEP).max(0.0)
        };
    }
    next
}

/// Run one full probe cycle and return `(healthy, total)` counts.
pub(crate) async fn run_cycle(
    inner: Arc<RwLock<RegistryInner>>,
    probe_timeout: Duration,
) -> (usize, usize) {
    let targets: Vec<(String, String, String)> = {
        let guard = inner.read().expect("registry lock");
        guard
            .services
            .values()
            .map(|s| (s.name.clone(), s.probe_address(), s.health_endpoint.clone()))
            .collect()
    };

    let mut probes = JoinSet::new();
    for (name, address, path) in targets {
        probes.spawn(async move {
            let report = http_probe(&address, &path, probe_timeout).await;
            (name, report)
        });
    }

    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((name, report)) => {
                let mut guard = inner.write().expect("registry lock");
                // A service unregistered mid-cycle has no record to update.
                if let Some(prev) = guard.health.get(&name) {
                    let next = transition(prev, &report);
                    debug!(
                        service = %name,
                        status = %next.status,
                        latency_ms = next.response_time_ms,
                        "health check recorded"
                    );
                    guard.health.insert(name, next);
                }
            }
            Err(e) => error!(error = %e, "health probe task failed"),
        }
    }

    let guard = inner.read().expect("registry lock");
    let healthy = guard
        .health
        .values()
        .filter(|h| h.status == ServiceStatus::Healthy)
        .count();
    (healthy, guard.health.len())
}

/// The background monitor loop: cycle, log, sleep, until shutdown.
///
/// An unexpected failure of a cycle (not an individual probe) is logged
/// and followed by a short backoff; the loop never exits on its own.
pub(crate) async fn monitor_loop(
    inner: Arc<RwLock<RegistryInner>>,
    check_interval: Duration,
    probe_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("health monitor loop starting");
    loop {
        let mut cycle = tokio::spawn(run_cycle(Arc::clone(&inner), probe_timeout));
        tokio::select! {
            joined = &mut cycle => {
                match joined {
                    Ok((healthy, total)) => {
                        info!(healthy, total, "health monitoring cycle completed");
                    }
                    Err(e) => {
                        error!(error = %e, "health monitoring cycle failed");
                        tokio::select! {
                            _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                            _ = shutdown.changed() => break,
                        }
                        continue;
                    }
                }
            }
            _ = shutdown.changed() => {
                cycle.abort();
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(check_interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("health monitor loop stopped");
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn checked(prev: ServiceHealth) -> ServiceHealth {
        // Mark the record as having completed at least one check.
        ServiceHealth {
            last_check: Some(1_000),
            ..prev
        }
    }

    fn ok_report() -> ProbeReport {
        ProbeReport::Ok {
            latency_ms: 4.2,
            metadata: HashMap::new(),
        }
    }

    fn bad_report() -> ProbeReport {
        ProbeReport::BadStatus {
            latency_ms: 3.0,
            status: 500,
        }
    }

    #[test]
    fn three_failures_then_recovery() {
        let mut health = ServiceHealth::unknown();
        for _ in 0..3 {
            health = transition(&health, &bad_report());
        }
        assert_eq!(health.status, ServiceStatus::Degraded);
        assert_eq!(health.consecutive_failures, 3);
        assert_eq!(health.error_message.as_deref(), Some("HTTP 500"));

        health = transition(&health, &ok_report());
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.error_message, None);
    }

    #[test]
    fn timeout_and_connection_errors_are_unhealthy() {
        let prev = checked(ServiceHealth::unknown());

        let timed_out = transition(&prev, &ProbeReport::TimedOut { latency_ms: 1000.0 });
        assert_eq!(timed_out.status, ServiceStatus::Unhealthy);
        assert_eq!(timed_out.error_message.as_deref(), Some("health check timeout"));
        assert_eq!(timed_out.consecutive_failures, 1);

        let failed = transition(
            &prev,
            &ProbeReport::Failed {
                error: "connection refused".to_string(),
            },
        );
        assert_eq!(failed.status, ServiceStatus::Unhealthy);
        assert_eq!(failed.consecutive_failures, 1);
    }

    #[test]
    fn first_check_does_not_adjust_uptime() {
        let cold = ServiceHealth::unknown();
        assert_eq!(cold.last_check, None);

        let after = transition(&cold, &bad_report());
        assert_eq!(after.uptime_percentage, 100.0);
        assert_eq!(after.status, ServiceStatus::Degraded);
        assert!(after.last_check.is_some());
    }

    #[test]
    fn uptime_erodes_faster_than_it_recovers() {
        let mut health = checked(ServiceHealth::unknown());

        health = transition(&health, &bad_report());
        assert_eq!(health.uptime_percentage, 98.0);

        health = transition(&health, &ok_report());
        assert_eq!(health.uptime_percentage, 99.0);

        // Alternating fail/success trends downward.
        for _ in 0..5 {
            health = transition(&health, &bad_report());
            health = transition(&health, &ok_report());
        }
        assert!(health.uptime_percentage < 99.0);
    }

    #[test]
    fn uptime_is_capped_and_floored() {
        let mut health = checked(ServiceHealth::unknown());
        for _ in 0..10 {
            health = transition(&health, &ok_report());
        }
        assert_eq!(health.uptime_percentage, 100.0);

        for _ in 0..60 {
            health = transition(&health, &bad_report());
        }
        assert_eq!(health.uptime_percentage, 0.0);
    }

    #[test]
    fn healthy_probe_replaces_metadata_snapshot() {
        let prev = checked(ServiceHealth::unknown());
        let mut meta = HashMap::new();
        meta.insert("version".to_string(), serde_json::json!("2.0"));

        let healthy = transition(
            &prev,
            &ProbeReport::Ok {
                latency_ms: 1.0,
                metadata: meta,
            },
        );
        assert_eq!(
            healthy.metadata.get("version"),
            Some(&serde_json::json!("2.0"))
        );

        // Failures keep the last successful snapshot.
        let degraded = transition(&healthy, &bad_report());
        assert_eq!(
            degraded.metadata.get("version"),
            Some(&serde_json::json!("2.0"))
        );
    }
}
