//! Lattice service registry.
//!
//! An in-memory directory of named network services with declared health
//! endpoints:
//! - **`types`** — service descriptors and per-service health records
//! - **`probe`** — single HTTP health probes
//! - **`monitor`** — the health state machine and background check loop
//! - **`registry`** — registration, queries, round-robin selection,
//!   lifecycle, and JSON config export/import
//!
//! Health problems are state, not errors: probe failures become status
//! transitions queryable via `get_health`/`get_healthy`, and a load-balance
//! request with no healthy candidate yields `None`.

pub mod error;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::{RegistryConfig, ServiceRegistry};
pub use types::{ServiceHealth, ServiceInfo, ServiceStatus};
