//! Lattice pooled SQLite access layer.
//!
//! Provides the data-access core shared by the backend services:
//! - **`pool`** — bounded connection pool with overflow on exhaustion
//! - **`cache`** — TTL-checked memoization of read-query results
//! - **`database`** — pool-backed facade combining both
//! - **`value`** — owned SQLite values and materialized rows
//!
//! A [`Database`] is constructed explicitly and passed by reference to
//! every consumer; the process entry point owns its lifecycle.

pub mod cache;
pub mod database;
pub mod error;
pub mod pool;
pub mod value;

pub use cache::{QueryCache, cache_key};
pub use database::{Database, DatabaseConfig, DatabaseStats};
pub use error::{DbError, DbResult};
pub use pool::{ConnectionPool, PoolConfig, PoolGuard, PoolStats};
pub use value::{Row, Value};
