use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// No connection to the file became available before the acquire timeout.
   ///
   /// Retryable: the file is busy, not broken.
   #[error("pool exhausted for {}: no connection available within {timeout:?}", path.display())]
   PoolExhausted { path: PathBuf, timeout: Duration },

   /// The pool has begun shutting down and accepts no new acquires.
   #[error("pool is shutting down")]
   PoolShuttingDown,

   /// The pool, or the file's queue, has been closed.
   #[error("pool is closed")]
   PoolClosed,

   /// No Tokio runtime is available to run the health monitor.
   #[error("no tokio runtime available")]
   NoRuntime,

   /// A new physical connection could not be opened.
   #[error("failed to open connection to {}: {source}", path.display())]
   ConnectionOpenFailed {
      path: PathBuf,
      #[source]
      source: sqlx_sqlite_driver::Error,
   },

   /// A connection was released to a pool that does not own it.
   #[error("invalid release: connection for {} does not belong to this pool", path.display())]
   InvalidRelease { path: PathBuf },

   /// Liveness probe on an idle connection failed.
   ///
   /// Only logged by the health monitor; never returned to callers.
   #[error("health probe failed for {}: {source}", path.display())]
   HealthProbeFailed {
      path: PathBuf,
      #[source]
      source: sqlx_sqlite_driver::Error,
   },

   /// Invalid database path provided.
   #[error("invalid database path: {0}")]
   InvalidPath(String),

   /// Pool configuration rejected by validation.
   #[error("invalid pool configuration: {0}")]
   InvalidConfig(String),

   /// Error from the database driver while using a connection.
   #[error(transparent)]
   Driver(#[from] sqlx_sqlite_driver::Error),

   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),
}

impl Error {
   /// Whether retrying the same call later can succeed.
   pub fn is_retryable(&self) -> bool {
      matches!(self, Error::PoolExhausted { .. })
   }
}
