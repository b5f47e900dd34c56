//! Domain types for the service registry.
//!
//! [`ServiceInfo`] is the static descriptor supplied at registration and
//! immutable thereafter (re-registration overwrites). [`ServiceHealth`] is
//! the mutable per-service record the monitor loop updates each cycle.
//! Both serialize to JSON for config export/import.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Health state of a registered service.
///
/// Services start `Unknown` and move freely among the other three on
/// every check cycle; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Static descriptor of a registered network service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique registry key.
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Path probed by the health monitor, e.g. `/health`.
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Tags partition services for load balancing.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            protocol: default_protocol(),
            health_endpoint: default_health_endpoint(),
            version: default_version(),
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_endpoint)
    }

    /// `host:port` target for the probe's TCP connect.
    pub(crate) fn probe_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mutable health record for one registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    /// Epoch seconds of the last completed check; `None` until the first
    /// check finishes.
    pub last_check: Option<u64>,
    pub response_time_ms: f64,
    pub error_message: Option<String>,
    pub consecutive_failures: u32,
    /// Smoothed uptime estimate in `[0, 100]`. Failures erode it faster
    /// than successes rebuild it.
    pub uptime_percentage: f64,
    /// Top-level keys of the last successful health payload.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServiceHealth {
    /// Cold initial record: status `unknown`, nothing checked yet.
    pub fn unknown() -> Self {
        Self {
            status: ServiceStatus::Unknown,
            last_check: None,
            response_time_ms: 0.0,
            error_message: None,
            consecutive_failures: 0,
            uptime_percentage: 100.0,
            metadata: HashMap::new(),
        }
    }
}
