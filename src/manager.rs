//! Public facade: acquisition, release, writes and lifecycle

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx_sqlite_driver::{Driver, SqlxDriver};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::guard::PooledConnection;
use crate::health::{self, HealthMonitor, SweepReport, SweepSettings};
use crate::queue::{CloseReason, FileQueue, FileStats, Returned};
use crate::registry::PoolRegistry;
use crate::{Error, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a [`PoolManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
   /// Constructed; the health monitor is not running yet
   Uninitialized,
   /// Handing out connections
   Running,
   /// `shutdown` in progress; no new acquires
   ShuttingDown,
   /// Terminal
   Closed,
}

struct Lifecycle {
   state: PoolState,
   monitor: Option<HealthMonitor>,
}

enum ShutdownStep {
   AlreadyClosed,
   InProgress(watch::Receiver<bool>),
   Begin(Option<HealthMonitor>),
}

struct Inner<D: Driver> {
   id: u64,
   config: PoolConfig,
   registry: Arc<PoolRegistry<D>>,
   lifecycle: Mutex<Lifecycle>,
   closed_tx: watch::Sender<bool>,
}

impl<D: Driver> Inner<D> {
   fn finish_shutdown(&self) {
      self.lifecycle.lock().state = PoolState::Closed;
      self.closed_tx.send_replace(true);
   }
}

/// Hands out connections to any number of SQLite files.
///
/// Each database path gets its own queue of at most
/// `max_connections_per_file` connections, created on first use. Callers
/// beyond the cap wait in FIFO order for up to the acquire timeout. Writes
/// to a file are serialized through [`run_exclusive_write`]; reads are not.
///
/// `PoolManager` is a cheap handle around shared state: clone it and pass
/// it to every component that needs database access.
///
/// # Example
///
/// ```no_run
/// use sqlite_pool_manager::{PoolConfig, PoolManager};
///
/// # async fn example() -> sqlite_pool_manager::Result<()> {
/// let pool = PoolManager::with_config(PoolConfig::default())?;
///
/// let count: i64 = pool
///    .with_connection("activity.db", None, |conn| {
///       Box::pin(async move {
///          let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
///             .fetch_one(&mut *conn)
///             .await?;
///          Ok::<_, sqlite_pool_manager::Error>(count)
///       })
///    })
///    .await?;
///
/// pool.shutdown().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`run_exclusive_write`]: PoolManager::run_exclusive_write
pub struct PoolManager<D: Driver = SqlxDriver> {
   inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for PoolManager<D> {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl<D: Driver> fmt::Debug for PoolManager<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PoolManager")
         .field("id", &self.inner.id)
         .field("state", &self.state())
         .field("config", &self.inner.config)
         .finish()
   }
}

impl PoolManager<SqlxDriver> {
   /// Create a pool over [`SqlxDriver`] with its default settings.
   pub fn with_config(config: PoolConfig) -> Result<Self> {
      Self::new(config, SqlxDriver::default())
   }
}

impl<D: Driver> PoolManager<D> {
   /// Create a pool. Nothing is opened and no task is spawned until
   /// [`start`](Self::start) or the first acquire.
   pub fn new(config: PoolConfig, driver: D) -> Result<Self> {
      config.validate()?;

      let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
      let registry = Arc::new(PoolRegistry::new(
         id,
         Arc::new(driver),
         config.max_connections(),
      ));
      let (closed_tx, _) = watch::channel(false);

      Ok(Self {
         inner: Arc::new(Inner {
            id,
            config,
            registry,
            lifecycle: Mutex::new(Lifecycle {
               state: PoolState::Uninitialized,
               monitor: None,
            }),
            closed_tx,
         }),
      })
   }

   pub fn config(&self) -> &PoolConfig {
      &self.inner.config
   }

   pub fn state(&self) -> PoolState {
      self.inner.lifecycle.lock().state
   }

   /// Move to `Running` and start the health monitor.
   ///
   /// Idempotent while running. Fails with [`Error::NoRuntime`] outside a
   /// Tokio runtime, leaving the pool uninitialized.
   pub fn start(&self) -> Result<()> {
      let mut lifecycle = self.inner.lifecycle.lock();
      match lifecycle.state {
         PoolState::Running => Ok(()),
         PoolState::ShuttingDown => Err(Error::PoolShuttingDown),
         PoolState::Closed => Err(Error::PoolClosed),
         PoolState::Uninitialized => {
            let handle = match tokio::runtime::Handle::try_current() {
               Ok(h) => h,
               Err(_) => {
                  warn!("No tokio runtime available for the health monitor");
                  return Err(Error::NoRuntime);
               }
            };

            let config = &self.inner.config;
            lifecycle.monitor = Some(HealthMonitor::spawn(
               &handle,
               Arc::downgrade(&self.inner.registry),
               config.health_check_interval(),
               self.sweep_settings(),
            ));
            lifecycle.state = PoolState::Running;
            info!(
               max_connections_per_file = config.max_connections_per_file,
               "Connection pool running"
            );
            Ok(())
         }
      }
   }

   fn sweep_settings(&self) -> SweepSettings {
      SweepSettings {
         idle_timeout: self.inner.config.idle_timeout(),
         probe_after: self.inner.config.probe_after(),
      }
   }

   /// Check out a connection to `path` using the configured acquire timeout.
   pub async fn acquire(&self, path: impl AsRef<Path>) -> Result<PooledConnection<D>> {
      self
         .acquire_with_timeout(path, self.inner.config.acquire_timeout())
         .await
   }

   /// Check out a connection to `path`, waiting at most `timeout` for one to free up.
   ///
   /// Reuses the most recently released idle connection if there is one,
   /// opens a new connection if the file is under its cap, and otherwise
   /// queues behind earlier callers. Fails with [`Error::PoolExhausted`] when
   /// the timeout elapses first.
   pub async fn acquire_with_timeout(
      &self,
      path: impl AsRef<Path>,
      timeout: Duration,
   ) -> Result<PooledConnection<D>> {
      let path = path.as_ref();
      if path.as_os_str().is_empty() {
         return Err(Error::InvalidPath("database path cannot be empty".to_string()));
      }

      self.start()?;
      let queue = self.inner.registry.get_or_create(path)?;
      queue.take(timeout).await
   }

   /// Return a connection explicitly.
   ///
   /// Dropping a [`PooledConnection`] does the same; this form reports
   /// misuse. Releasing into a pool that did not hand out the connection
   /// fails with [`Error::InvalidRelease`] (the connection still goes back
   /// to its own pool), and releasing one that shutdown already revoked
   /// fails with [`Error::PoolClosed`].
   pub fn release(&self, conn: PooledConnection<D>) -> Result<()> {
      if conn.pool_id() != self.inner.id {
         return Err(Error::InvalidRelease {
            path: conn.path().to_path_buf(),
         });
      }

      match conn.release() {
         Returned::Idle | Returned::Discarded => Ok(()),
         Returned::Revoked => Err(Error::PoolClosed),
      }
   }

   /// Run `f` with a connection to `path`, releasing it on every exit path.
   ///
   /// `timeout` overrides the configured acquire timeout. Errors from
   /// acquisition convert into the closure's error type.
   pub async fn with_connection<F, T, E>(
      &self,
      path: impl AsRef<Path>,
      timeout: Option<Duration>,
      f: F,
   ) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let timeout = timeout.unwrap_or_else(|| self.inner.config.acquire_timeout());
      let mut conn = self.acquire_with_timeout(path, timeout).await?;
      f(&mut *conn).await
   }

   /// Run `f` as the only writer on `path`, inside a write transaction.
   ///
   /// See [`PooledConnection::run_exclusive_write`].
   pub async fn run_exclusive_write<F, T, E>(
      &self,
      path: impl AsRef<Path>,
      f: F,
   ) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let mut conn = self.acquire(path).await?;
      conn.run_exclusive_write(f).await
   }

   /// Connection counts for `path`, if it has been used.
   pub fn stats(&self, path: impl AsRef<Path>) -> Option<FileStats> {
      self
         .inner
         .registry
         .get(path.as_ref())
         .map(|queue| queue.stats())
   }

   /// Connection counts for every file with a queue.
   pub fn stats_all(&self) -> Vec<FileStats> {
      self
         .inner
         .registry
         .snapshot()
         .iter()
         .map(|queue| queue.stats())
         .collect()
   }

   /// Run one health sweep now instead of waiting for the next interval.
   pub async fn run_health_check(&self) -> SweepReport {
      health::sweep(&self.inner.registry.snapshot(), self.sweep_settings()).await
   }

   /// Drop the queue for `path`.
   ///
   /// Waiters fail with [`Error::PoolClosed`], as does any acquire for
   /// `path` until the queue is gone. Checked-out connections get the
   /// shutdown grace period to come back; the rest are revoked. Writes stay
   /// serialized with the next queue for `path` even while revoked
   /// connections are still held. Returns `false` if `path` had no queue.
   pub async fn close_file(&self, path: impl AsRef<Path>) -> Result<bool> {
      let path = path.as_ref();
      let Some(queue) = self.inner.registry.get(path) else {
         return Ok(false);
      };

      debug!(path = %path.display(), "Closing file queue");

      // Finishes even if the caller stops waiting
      let registry = Arc::clone(&self.inner.registry);
      let grace = self.inner.config.shutdown_grace_period();
      let path = path.to_path_buf();
      let closing = tokio::spawn(async move {
         drain_and_close(std::slice::from_ref(&queue), CloseReason::Evicted, grace).await;
         registry.remove_if_current(&path, &queue);
      });

      if let Err(e) = closing.await {
         error!("File queue close task failed: {:?}", e);
      }
      Ok(true)
   }

   /// Shut down with the configured grace period.
   pub async fn shutdown(&self) -> Result<()> {
      self
         .shutdown_with_grace(self.inner.config.shutdown_grace_period())
         .await
   }

   /// Stop accepting acquires, wait up to `grace` for checked-out
   /// connections, then close everything.
   ///
   /// Connections still held when the grace period ends are revoked: they
   /// are closed as soon as their holder drops them instead of being reused.
   /// Calling this again after completion is a no-op; calling it while a
   /// shutdown is in progress waits for that shutdown.
   pub async fn shutdown_with_grace(&self, grace: Duration) -> Result<()> {
      let monitor = match self.begin_shutdown() {
         ShutdownStep::AlreadyClosed => return Ok(()),
         ShutdownStep::InProgress(mut closed_rx) => {
            let _ = closed_rx.wait_for(|closed| *closed).await;
            return Ok(());
         }
         ShutdownStep::Begin(monitor) => monitor,
      };

      info!(?grace, "Shutting down connection pool");

      // Completes even if this future is dropped
      let inner = Arc::clone(&self.inner);
      let closing = tokio::spawn(async move {
         if let Some(monitor) = monitor {
            monitor.stop().await;
         }

         let queues = inner.registry.close();
         drain_and_close(&queues, CloseReason::Shutdown, grace).await;
         inner.finish_shutdown();

         info!(files = queues.len(), "Connection pool closed");
      });

      if let Err(e) = closing.await {
         error!("Shutdown task failed: {:?}", e);
         self.inner.finish_shutdown();
      }
      Ok(())
   }

   fn begin_shutdown(&self) -> ShutdownStep {
      let mut lifecycle = self.inner.lifecycle.lock();
      match lifecycle.state {
         PoolState::Closed => ShutdownStep::AlreadyClosed,
         PoolState::ShuttingDown => ShutdownStep::InProgress(self.inner.closed_tx.subscribe()),
         PoolState::Uninitialized | PoolState::Running => {
            lifecycle.state = PoolState::ShuttingDown;
            ShutdownStep::Begin(lifecycle.monitor.take())
         }
      }
   }
}

async fn drain_and_close<D: Driver>(queues: &[Arc<FileQueue<D>>], reason: CloseReason, grace: Duration) {
   for queue in queues {
      queue.close(reason);
   }

   let drained = tokio::time::timeout(grace, join_all(queues.iter().map(|q| q.wait_drained()))).await;

   if drained.is_err() {
      for queue in queues {
         let revoked = queue.revoke_checked_out();
         if revoked > 0 {
            warn!(
               path = %queue.path().display(),
               revoked,
               "Grace period elapsed with connections still checked out; revoking them"
            );
         }
      }
   }

   join_all(queues.iter().map(|q| q.close_idle())).await;
}
