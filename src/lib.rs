//! # sqlite-pool-manager
//!
//! One shared connection pool for every SQLite file a process touches.
//!
//! ## Core Types
//!
//! - **[`PoolManager`]**: acquire / release / scoped access / exclusive writes / shutdown
//! - **[`PooledConnection`]**: RAII handle that returns its connection on drop
//! - **[`PoolConfig`]**: per-file cap, idle timeout, acquire timeout, health check interval
//! - **[`Driver`]**: the seam to the database driver, [`SqlxDriver`] by default
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Per-file queues**: each database path gets its own bounded set of
//!   connections, created lazily on first use
//! - **FIFO waiting**: callers beyond the cap queue first-come, first-served
//!   until a connection frees up or the acquire timeout elapses
//! - **Single writer per file**: [`PoolManager::run_exclusive_write`] serializes
//!   write transactions on a file; reads are not serialized
//! - **Health monitor**: a background task closes connections idle past the
//!   timeout and probes aging ones, evicting any that fail
//! - **Lifecycle**: `Uninitialized → Running → ShuttingDown → Closed`
//!
//! ## Usage
//!
//! ```no_run
//! use sqlite_pool_manager::{PoolConfig, PoolManager};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pool_manager::Result<()> {
//!    let pool = PoolManager::with_config(PoolConfig::default())?;
//!
//!    // Reads: any number of connections up to the per-file cap
//!    let mut conn = pool.acquire("messages.db").await?;
//!    let rows = sqlx::query("SELECT * FROM messages")
//!       .fetch_all(&mut *conn)
//!       .await?;
//!    drop(conn);
//!
//!    // Writes: one at a time per file, committed on success
//!    pool.run_exclusive_write("messages.db", |conn| {
//!       Box::pin(async move {
//!          sqlx::query("DELETE FROM messages WHERE id = ?")
//!             .bind(1_i64)
//!             .execute(&mut *conn)
//!             .await?;
//!          Ok::<_, sqlite_pool_manager::Error>(())
//!       })
//!    })
//!    .await?;
//!
//!    pool.shutdown().await?;
//!    Ok(())
//! }
//! ```
//!
mod config;
mod error;
mod global;
mod guard;
mod health;
mod manager;
mod queue;
mod registry;
mod slot;

#[cfg(test)]
mod mock;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use global::{global, init_global};
pub use guard::PooledConnection;
pub use health::SweepReport;
pub use manager::{PoolManager, PoolState};
pub use queue::FileStats;

// Re-export the driver seam so callers can plug in their own
pub use sqlx_sqlite_driver::{Driver, SqlxDriver, SqlxDriverConfig};
