//! Error types for the Lattice data-access layer.

use thiserror::Error;

/// Result type alias for data-access operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur during data-access operations.
///
/// Storage-engine errors propagate unmodified; the layer never swallows
/// a failed query.
#[derive(Debug, Error)]
pub enum DbError {
    /// The pool has been closed; callers must construct a new [`crate::Database`].
    #[error("connection pool is closed")]
    PoolClosed,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
