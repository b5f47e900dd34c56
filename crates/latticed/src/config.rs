//! Daemon configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or a missing section) is
//! a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use lattice_db::DatabaseConfig;
use lattice_registry::{RegistryConfig, ServiceInfo};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub database: DatabaseSection,
    pub registry: RegistrySection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
    pub pool_size: usize,
    pub acquire_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lattice.db"),
            pool_size: 10,
            acquire_timeout_secs: 30,
            cache_ttl_secs: 300,
            cache_max_entries: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub check_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Services registered at startup.
    pub services: Vec<ServiceInfo>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            probe_timeout_secs: 10,
            services: Vec::new(),
        }
    }
}

impl LatticeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.database.path)
            .pool_size(self.database.pool_size)
            .acquire_timeout(Duration::from_secs(self.database.acquire_timeout_secs))
            .cache_ttl(Duration::from_secs(self.database.cache_ttl_secs))
            .cache_max_entries(self.database.cache_max_entries)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            check_interval: Duration::from_secs(self.registry.check_interval_secs),
            probe_timeout: Duration::from_secs(self.registry.probe_timeout_secs),
        }
    }
}
