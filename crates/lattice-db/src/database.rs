//! Pool-backed data-access facade.
//!
//! [`Database`] combines the connection pool and the query cache behind
//! one surface: `execute`, `execute_cached`, `execute_many`, scoped
//! `acquire`, cache control, and a combined stats snapshot. It is
//! constructed explicitly and passed by reference to consumers; the
//! process entry point owns `open`/`close`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{self, QueryCache};
use crate::error::DbResult;
use crate::pool::{ConnectionPool, PoolConfig, PoolGuard};
use crate::value::{self, Row, Value};

/// Configuration for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(30),
            cache_max_entries: 1000,
            cache_ttl: Duration::from_secs(300),
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn cache_max_entries(mut self, cache_max_entries: usize) -> Self {
        self.cache_max_entries = cache_max_entries;
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }
}

/// Combined pool and cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub cached_queries: usize,
}

/// Pooled, cache-layered SQLite access.
pub struct Database {
    pool: ConnectionPool,
    cache: QueryCache,
}

impl Database {
    /// Open the database: initialize the pool and an empty cache.
    pub fn open(config: DatabaseConfig) -> Self {
        let pool = ConnectionPool::open(
            PoolConfig::new(config.path)
                .pool_size(config.pool_size)
                .acquire_timeout(config.acquire_timeout),
        );
        let cache = QueryCache::new(config.cache_max_entries, config.cache_ttl);
        Self { pool, cache }
    }

    /// Scoped connection acquisition for callers running raw statements.
    pub fn acquire(&self) -> DbResult<PoolGuard<'_>> {
        self.pool.acquire()
    }

    /// Execute a query and materialize every row. Uncached.
    ///
    /// Storage-engine errors propagate to the caller unmodified.
    pub fn execute(&self, query: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(query)?;
        let rows = value::collect_rows(&mut stmt, params)?;
        Ok(rows)
    }

    /// Execute a read query through the cache.
    ///
    /// A fresh entry under the derived (or explicit) key is returned
    /// without touching storage; otherwise the query runs via the pool and
    /// the result is stored under the key.
    pub fn execute_cached(
        &self,
        query: &str,
        params: &[Value],
        cache_key: Option<&str>,
        ttl: Option<Duration>,
    ) -> DbResult<Arc<Vec<Row>>> {
        let ttl = ttl.unwrap_or_else(|| self.cache.default_ttl());
        let key = match cache_key {
            Some(key) => key.to_string(),
            None => cache::cache_key(query, params),
        };

        if let Some(rows) = self.cache.get(&key, ttl) {
            return Ok(rows);
        }

        let rows = Arc::new(self.execute(query, params)?);
        self.cache.insert(key, Arc::clone(&rows));
        Ok(rows)
    }

    /// Apply one statement to many parameter tuples on one borrowed
    /// connection; returns the summed affected-row count.
    pub fn execute_many(&self, query: &str, params_list: &[Vec<Value>]) -> DbResult<usize> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(query)?;
        let mut affected = 0;
        for params in params_list {
            affected += stmt.execute(rusqlite::params_from_iter(params.iter()))?;
        }
        Ok(affected)
    }

    /// Remove cached entries matching `pattern` (substring), or all.
    pub fn clear_cache(&self, pattern: Option<&str>) {
        self.cache.clear(pattern);
    }

    /// Combined pool and cache counters.
    pub fn stats(&self) -> DatabaseStats {
        let pool = self.pool.stats();
        let hits = self.cache.hit_count();
        let misses = self.cache.miss_count();
        DatabaseStats {
            total_connections: pool.total_connections,
            active_connections: pool.active_connections,
            idle_connections: pool.idle_connections,
            total_requests: pool.total_requests,
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_ratio: hits as f64 / (hits + misses).max(1) as f64,
            cached_queries: self.cache.len(),
        }
    }

    /// Close the pool and drop all cached results. Idempotent.
    ///
    /// Subsequent `execute`/`acquire` calls fail with
    /// [`crate::DbError::PoolClosed`]; there is no re-initialization.
    pub fn close(&self) {
        self.pool.close();
        self.cache.clear(None);
        self.cache.reset_counters();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(
            DatabaseConfig::new(dir.path().join("lattice.db"))
                .pool_size(3)
                .acquire_timeout(Duration::from_secs(1)),
        );
        db.execute(
            "CREATE TABLE docs (id INTEGER PRIMARY KEY, title TEXT, score REAL)",
            &[],
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn execute_round_trip() {
        let (_dir, db) = temp_db();
        db.execute(
            "INSERT INTO docs (title, score) VALUES (?, ?)",
            &[Value::from("alpha"), Value::from(0.5)],
        )
        .unwrap();

        let rows = db.execute("SELECT id, title, score FROM docs", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title"), Some(&Value::Text("alpha".to_string())));
        assert_eq!(rows[0].get("score"), Some(&Value::Real(0.5)));
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["id", "title", "score"]);
    }

    #[test]
    fn execute_many_counts_affected_rows() {
        let (_dir, db) = temp_db();
        let batch: Vec<Vec<Value>> = (0..5)
            .map(|i| vec![Value::from(format!("doc-{i}")), Value::from(i as f64)])
            .collect();
        let affected = db
            .execute_many("INSERT INTO docs (title, score) VALUES (?, ?)", &batch)
            .unwrap();
        assert_eq!(affected, 5);

        let rows = db.execute("SELECT COUNT(*) AS n FROM docs", &[]).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(5)));
    }

    #[test]
    fn cached_execution_hits_on_identical_query_and_params() {
        let (_dir, db) = temp_db();
        db.execute(
            "INSERT INTO docs (title, score) VALUES (?, ?)",
            &[Value::from("beta"), Value::from(1.0)],
        )
        .unwrap();

        let q = "SELECT title FROM docs WHERE score > ?";
        let first = db.execute_cached(q, &[Value::from(0.0)], None, None).unwrap();
        assert_eq!(db.stats().cache_misses, 1);

        let second = db.execute_cached(q, &[Value::from(0.0)], None, None).unwrap();
        assert_eq!(db.stats().cache_misses, 1);
        assert_eq!(db.stats().cache_hits, 1);
        assert_eq!(first, second);

        // Any parameter change is a miss.
        db.execute_cached(q, &[Value::from(2.0)], None, None).unwrap();
        assert_eq!(db.stats().cache_misses, 2);
    }

    #[test]
    fn explicit_cache_key_and_pattern_clear() {
        let (_dir, db) = temp_db();
        let q = "SELECT COUNT(*) AS n FROM docs";
        db.execute_cached(q, &[], Some("docs_count"), None).unwrap();
        assert_eq!(db.stats().cached_queries, 1);

        db.clear_cache(Some("docs"));
        assert_eq!(db.stats().cached_queries, 0);
    }

    #[test]
    fn query_errors_propagate() {
        let (_dir, db) = temp_db();
        let err = db.execute("SELECT * FROM no_such_table", &[]).unwrap_err();
        assert!(matches!(err, DbError::Sqlite(_)));
    }

    #[test]
    fn execute_after_close_fails_predictably() {
        let (_dir, db) = temp_db();
        db.close();
        assert!(db.is_closed());
        assert!(matches!(
            db.execute("SELECT 1", &[]),
            Err(DbError::PoolClosed)
        ));
        // Stats are reset, not stale.
        let stats = db.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.cached_queries, 0);
        db.close(); // idempotent
    }

    #[test]
    fn stats_reflect_hit_ratio() {
        let (_dir, db) = temp_db();
        let q = "SELECT COUNT(*) AS n FROM docs";
        db.execute_cached(q, &[], None, None).unwrap();
        db.execute_cached(q, &[], None, None).unwrap();
        db.execute_cached(q, &[], None, None).unwrap();

        let stats = db.stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.cache_hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }
}
