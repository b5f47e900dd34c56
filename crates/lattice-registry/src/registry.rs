//! The service registry: registration, health queries, round-robin
//! selection, lifecycle, and JSON config export/import.
//!
//! All registry state lives behind one `RwLock` that is never held across
//! an await point; probes run outside the lock and only the bookkeeping
//! writes take it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::RegistryResult;
use crate::monitor;
use crate::types::{ServiceHealth, ServiceInfo, ServiceStatus};

/// Configuration for a [`ServiceRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Pause between health-check cycles.
    pub check_interval: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Registry state guarded by the lock.
///
/// `services` is ordered by name so round-robin rotation visits a stable
/// candidate sequence whenever the healthy set is unchanged.
pub(crate) struct RegistryInner {
    pub(crate) services: BTreeMap<String, ServiceInfo>,
    pub(crate) health: HashMap<String, ServiceHealth>,
    pub(crate) cursors: HashMap<String, usize>,
}

/// Handle to the spawned monitor task.
struct MonitorHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// On-disk shape of `export_config`/`import_config`.
#[derive(Serialize, Deserialize)]
struct RegistryConfigFile {
    services: BTreeMap<String, ServiceInfo>,
    health_status: BTreeMap<String, ServiceHealth>,
}

/// In-memory directory of named services with background health checks.
///
/// Construct one per process and pass it by reference; `start`/`stop` own
/// the monitor task lifecycle.
pub struct ServiceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    check_interval: Duration,
    probe_timeout: Duration,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        info!(
            check_interval_secs = config.check_interval.as_secs(),
            probe_timeout_secs = config.probe_timeout.as_secs(),
            "service registry initialized"
        );
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                services: BTreeMap::new(),
                health: HashMap::new(),
                cursors: HashMap::new(),
            })),
            check_interval: config.check_interval,
            probe_timeout: config.probe_timeout,
            monitor: Mutex::new(None),
        }
    }

    /// Register a service; re-registration overwrites the descriptor and
    /// resets its health record to `unknown`.
    pub fn register(&self, service: ServiceInfo) {
        let mut inner = self.inner.write().expect("registry lock");
        info!(service = %service.name, url = %service.base_url(), "service registered");
        inner
            .health
            .insert(service.name.clone(), ServiceHealth::unknown());
        inner.services.insert(service.name.clone(), service);
    }

    /// Remove a service and its health record.
    pub fn unregister(&self, name: &str) {
        let mut inner = self.inner.write().expect("registry lock");
        if inner.services.remove(name).is_some() {
            inner.health.remove(name);
            info!(service = %name, "service unregistered");
        }
    }

    /// Look up a service descriptor.
    pub fn get(&self, name: &str) -> Option<ServiceInfo> {
        self.inner
            .read()
            .expect("registry lock")
            .services
            .get(name)
            .cloned()
    }

    /// All currently-healthy services, optionally filtered by tag, in
    /// name order.
    pub fn get_healthy(&self, tag: Option<&str>) -> Vec<ServiceInfo> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .services
            .values()
            .filter(|svc| {
                inner
                    .health
                    .get(&svc.name)
                    .is_some_and(|h| h.status == ServiceStatus::Healthy)
            })
            .filter(|svc| tag.is_none_or(|t| svc.tags.iter().any(|s| s == t)))
            .cloned()
            .collect()
    }

    /// Round-robin selection over the currently-healthy services carrying
    /// `tag`; `None` when no healthy candidate exists.
    ///
    /// The per-tag cursor advances modulo the eligible count at call time,
    /// so fairness holds between consecutive calls with an unchanged
    /// healthy set and simply wraps when the set shrinks or grows.
    pub fn select_for_load_balancing(&self, tag: &str) -> Option<ServiceInfo> {
        let mut guard = self.inner.write().expect("registry lock");
        let inner = &mut *guard;

        let eligible: Vec<&ServiceInfo> = inner
            .services
            .values()
            .filter(|svc| {
                inner
                    .health
                    .get(&svc.name)
                    .is_some_and(|h| h.status == ServiceStatus::Healthy)
            })
            .filter(|svc| svc.tags.iter().any(|t| t == tag))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let cursor = inner.cursors.entry(format!("lb_{tag}")).or_insert(0);
        let index = *cursor % eligible.len();
        *cursor += 1;

        let selected = eligible[index].clone();
        debug!(service = %selected.name, tag, "service selected for load balancing");
        Some(selected)
    }

    /// Health record for one service.
    pub fn get_health(&self, name: &str) -> Option<ServiceHealth> {
        self.inner
            .read()
            .expect("registry lock")
            .health
            .get(name)
            .cloned()
    }

    /// Snapshot of every health record, keyed by service name.
    pub fn all_health(&self) -> BTreeMap<String, ServiceHealth> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .health
            .iter()
            .map(|(name, health)| (name.clone(), health.clone()))
            .collect()
    }

    /// Run one probe cycle immediately; returns `(healthy, total)`.
    pub async fn check_now(&self) -> (usize, usize) {
        monitor::run_cycle(Arc::clone(&self.inner), self.probe_timeout).await
    }

    /// Spawn the background monitor task. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.monitor.lock().expect("monitor lock");
        if slot.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor::monitor_loop(
            Arc::clone(&self.inner),
            self.check_interval,
            self.probe_timeout,
            shutdown_rx,
        ));
        *slot = Some(MonitorHandle {
            handle,
            shutdown_tx,
        });
        info!("service registry started");
    }

    /// Whether the monitor task is running.
    pub fn is_running(&self) -> bool {
        self.monitor.lock().expect("monitor lock").is_some()
    }

    /// Cancel the monitor task and await its acknowledgement, abandoning
    /// in-flight probes. No-op if not running.
    pub async fn stop(&self) {
        let taken = self.monitor.lock().expect("monitor lock").take();
        if let Some(monitor) = taken {
            let _ = monitor.shutdown_tx.send(true);
            let _ = monitor.handle.await;
            info!("service registry stopped");
        }
    }

    /// Write `{services, health_status}` as pretty JSON to `path`.
    pub fn export_config(&self, path: &Path) -> RegistryResult<()> {
        let file = {
            let inner = self.inner.read().expect("registry lock");
            RegistryConfigFile {
                services: inner.services.clone(),
                health_status: inner
                    .health
                    .iter()
                    .map(|(name, health)| (name.clone(), health.clone()))
                    .collect(),
            }
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        info!(
            path = %path.display(),
            services = file.services.len(),
            "registry configuration exported"
        );
        Ok(())
    }

    /// Register every service found in an exported config file.
    ///
    /// Health restarts at `unknown`; the exported `health_status` block is
    /// informational only. Returns the number of services registered.
    pub fn import_config(&self, path: &Path) -> RegistryResult<usize> {
        let raw = std::fs::read_to_string(path)?;
        let file: RegistryConfigFile = serde_json::from_str(&raw)?;
        let count = file.services.len();
        for (_, service) in file.services {
            self.register(service);
        }
        info!(path = %path.display(), services = count, "registry configuration imported");
        Ok(count)
    }
}
