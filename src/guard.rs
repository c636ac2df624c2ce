//! Scoped handle to a pooled connection

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx_sqlite_driver::Driver;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error};

use crate::Error;
use crate::queue::{FileQueue, Returned};
use crate::slot::ConnectionSlot;

const SLOT_PRESENT: &str = "BUG: PooledConnection slot taken before drop";

/// A connection checked out of a file's queue.
///
/// The guard derefs to the driver's connection type, so with the default
/// driver it can be used directly as a sqlx executor. Dropping it returns the
/// connection to its queue on every exit path, including errors, panics and
/// cancellation of the owning task; there is no way to release it twice.
///
/// # Example
///
/// ```no_run
/// use sqlite_pool_manager::{PoolConfig, PoolManager};
///
/// # async fn example() -> sqlite_pool_manager::Result<()> {
/// let pool = PoolManager::with_config(PoolConfig::default())?;
/// let mut conn = pool.acquire("activity.db").await?;
///
/// sqlx::query("SELECT COUNT(*) FROM messages")
///    .fetch_one(&mut *conn)
///    .await?;
///
/// // Returned to the idle list here
/// drop(conn);
/// # Ok(())
/// # }
/// ```
pub struct PooledConnection<D: Driver> {
   slot: Option<ConnectionSlot<D::Connection>>,
   permit: Option<OwnedSemaphorePermit>,
   queue: Arc<FileQueue<D>>,
}

impl<D: Driver> PooledConnection<D> {
   pub(crate) fn new(
      slot: ConnectionSlot<D::Connection>,
      permit: OwnedSemaphorePermit,
      queue: Arc<FileQueue<D>>,
   ) -> Self {
      Self {
         slot: Some(slot),
         permit: Some(permit),
         queue,
      }
   }

   fn slot(&self) -> &ConnectionSlot<D::Connection> {
      self.slot.as_ref().expect(SLOT_PRESENT)
   }

   fn slot_mut(&mut self) -> &mut ConnectionSlot<D::Connection> {
      self.slot.as_mut().expect(SLOT_PRESENT)
   }

   /// Database file this connection is bound to
   pub fn path(&self) -> &Path {
      self.slot().path()
   }

   /// Identifier of the underlying slot, unique within its file's queue
   pub fn slot_id(&self) -> u64 {
      self.slot().id()
   }

   pub(crate) fn pool_id(&self) -> u64 {
      self.queue.pool_id()
   }

   /// Run `f` as the only writer on this file.
   ///
   /// Waits for the file's write lock, opens a write transaction, runs `f`
   /// and commits if it succeeds or rolls back if it fails. The lock is
   /// released on every path. If the transaction cannot be closed cleanly
   /// (or this future is dropped mid-write), the connection is discarded
   /// instead of being reused.
   ///
   /// # Example
   ///
   /// ```no_run
   /// use sqlite_pool_manager::{PoolConfig, PoolManager};
   ///
   /// # async fn example() -> sqlite_pool_manager::Result<()> {
   /// let pool = PoolManager::with_config(PoolConfig::default())?;
   /// let mut conn = pool.acquire("welcome.db").await?;
   ///
   /// conn
   ///    .run_exclusive_write(|conn| {
   ///       Box::pin(async move {
   ///          sqlx::query("INSERT INTO greetings (guild_id) VALUES (?)")
   ///          .bind(42_i64)
   ///          .execute(&mut *conn)
   ///          .await?;
   ///          Ok::<_, sqlite_pool_manager::Error>(())
   ///       })
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn run_exclusive_write<F, T, E>(&mut self, f: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: From<Error>,
   {
      let queue = Arc::clone(&self.queue);
      let _write = queue.write_lock().lock().await;
      let driver = queue.driver();
      let slot = self.slot_mut();

      // Set before the await: a cancelled BEGIN may still have reached the
      // database, and such a slot must not be reused
      slot.set_write_open(true);
      if let Err(e) = driver.begin_write(slot.conn_mut()).await {
         slot.set_write_open(false);
         return Err(Error::from(e).into());
      }

      match f(slot.conn_mut()).await {
         Ok(value) => {
            if let Err(e) = driver.commit(slot.conn_mut()).await {
               if driver.rollback(slot.conn_mut()).await.is_ok() {
                  slot.set_write_open(false);
               }
               return Err(Error::from(e).into());
            }
            slot.set_write_open(false);
            Ok(value)
         }
         Err(e) => {
            match driver.rollback(slot.conn_mut()).await {
               Ok(()) => slot.set_write_open(false),
               Err(rollback_err) => {
                  error!(
                     path = %slot.path().display(),
                     slot = slot.id(),
                     "Rollback after failed write failed: {}",
                     rollback_err
                  );
               }
            }
            Err(e)
         }
      }
   }

   /// Hand the slot back to its queue, then free its capacity permit.
   pub(crate) fn release(mut self) -> Returned {
      self.return_to_queue().unwrap_or(Returned::Revoked)
   }

   fn return_to_queue(&mut self) -> Option<Returned> {
      let slot = self.slot.take()?;
      let returned = self.queue.give_back(slot);
      // Only now may the next waiter run; it will find the slot idle
      drop(self.permit.take());
      Some(returned)
   }
}

impl<D: Driver> Deref for PooledConnection<D> {
   type Target = D::Connection;

   fn deref(&self) -> &Self::Target {
      self.slot().conn()
   }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.slot_mut().conn_mut()
   }
}

impl<D: Driver> Drop for PooledConnection<D> {
   fn drop(&mut self) {
      if let Some(Returned::Revoked) = self.return_to_queue() {
         debug!(path = %self.queue.path().display(), "Connection returned after its pool closed");
      }
   }
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PooledConnection")
         .field("path", &self.queue.path())
         .field("slot", &self.slot.as_ref().map(ConnectionSlot::id))
         .finish()
   }
}
