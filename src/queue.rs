//! Bounded set of connections to one database file

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sqlx_sqlite_driver::Driver;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use crate::guard::PooledConnection;
use crate::slot::ConnectionSlot;
use crate::{Error, Result};

/// Point-in-time view of one file's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
   pub path: PathBuf,
   pub max_connections: usize,
   /// Connections currently held by callers
   pub active: usize,
   /// Open connections waiting to be reused
   pub idle: usize,
}

/// Single-writer lock for one database file.
///
/// Owned by the registry rather than the queue, so it outlives a queue that
/// is closed and replaced while its connections are still checked out.
pub(crate) type WriteLock = tokio::sync::Mutex<()>;

/// Why a queue stopped accepting takers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
   Shutdown,
   Evicted,
}

impl CloseReason {
   fn into_error(self) -> Error {
      match self {
         CloseReason::Shutdown => Error::PoolShuttingDown,
         CloseReason::Evicted => Error::PoolClosed,
      }
   }
}

/// What happened to a slot handed back by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Returned {
   Idle,
   /// Unusable (write left open); the connection is being closed
   Discarded,
   /// The queue had already revoked the slot
   Revoked,
}

struct QueueState<C> {
   /// Most recently released first
   idle: VecDeque<ConnectionSlot<C>>,
   checked_out: HashSet<u64>,
   closing: Option<CloseReason>,
}

/// Connections dedicated to a single database file.
///
/// Capacity is a semaphore with `max_connections` permits: a caller holds a
/// permit for as long as it holds a slot, so checked-out slots never exceed
/// the cap, and tokio's semaphore queues blocked callers first-come,
/// first-served. A new physical connection is opened only when a permit
/// holder finds no idle slot, which keeps `active + idle <= max_connections`.
///
/// Idle-list and checked-out bookkeeping share one short synchronous lock
/// that is never held across an `.await`.
pub(crate) struct FileQueue<D: Driver> {
   pool_id: u64,
   path: Arc<PathBuf>,
   max_connections: usize,
   driver: Arc<D>,
   permits: Arc<Semaphore>,
   state: Mutex<QueueState<D::Connection>>,
   write_lock: Arc<WriteLock>,
   drained: Notify,
   next_slot_id: AtomicU64,
}

impl<D: Driver> FileQueue<D> {
   pub(crate) fn new(
      pool_id: u64,
      path: PathBuf,
      max_connections: usize,
      driver: Arc<D>,
      write_lock: Arc<WriteLock>,
   ) -> Self {
      Self {
         pool_id,
         path: Arc::new(path),
         max_connections,
         driver,
         permits: Arc::new(Semaphore::new(max_connections)),
         state: Mutex::new(QueueState {
            idle: VecDeque::with_capacity(max_connections),
            checked_out: HashSet::with_capacity(max_connections),
            closing: None,
         }),
         write_lock,
         drained: Notify::new(),
         next_slot_id: AtomicU64::new(1),
      }
   }

   pub(crate) fn pool_id(&self) -> u64 {
      self.pool_id
   }

   pub(crate) fn path(&self) -> &Path {
      &self.path
   }

   pub(crate) fn driver(&self) -> &D {
      &self.driver
   }

   pub(crate) fn write_lock(&self) -> &WriteLock {
      &self.write_lock
   }

   pub(crate) fn stats(&self) -> FileStats {
      let state = self.state.lock();
      FileStats {
         path: self.path.to_path_buf(),
         max_connections: self.max_connections,
         active: state.checked_out.len(),
         idle: state.idle.len(),
      }
   }

   /// Check out a connection, waiting up to `timeout` for capacity.
   ///
   /// Dropping the returned future while it waits removes the caller from
   /// the wait queue without consuming capacity.
   pub(crate) async fn take(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection<D>> {
      let acquire = Arc::clone(&self.permits).acquire_owned();
      let permit = match tokio::time::timeout(timeout, acquire).await {
         Ok(Ok(permit)) => permit,
         // The semaphore is only closed by `close`
         Ok(Err(_)) => return Err(self.closing_error()),
         Err(_) => {
            debug!(path = %self.path.display(), ?timeout, "Timed out waiting for a connection");
            return Err(Error::PoolExhausted {
               path: self.path.to_path_buf(),
               timeout,
            });
         }
      };

      if let Some(mut slot) = self.pop_idle()? {
         slot.touch();
         trace!(path = %self.path.display(), slot = slot.id(), "Reusing idle connection");
         return Ok(PooledConnection::new(slot, permit, Arc::clone(self)));
      }

      // The permit reserves capacity for the connection being opened
      let conn = self
         .driver
         .open(&self.path)
         .await
         .map_err(|source| Error::ConnectionOpenFailed {
            path: self.path.to_path_buf(),
            source,
         })?;

      let id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
      let slot = ConnectionSlot::new(conn, id, Arc::clone(&self.path));

      if let Err(reason) = self.check_out(id) {
         self.close_slot(slot).await;
         return Err(reason.into_error());
      }

      debug!(path = %self.path.display(), slot = id, "Opened new connection");
      Ok(PooledConnection::new(slot, permit, Arc::clone(self)))
   }

   fn pop_idle(&self) -> Result<Option<ConnectionSlot<D::Connection>>> {
      let mut state = self.state.lock();
      if let Some(reason) = state.closing {
         return Err(reason.into_error());
      }

      let slot = state.idle.pop_front();
      if let Some(slot) = &slot {
         state.checked_out.insert(slot.id());
      }
      Ok(slot)
   }

   fn check_out(&self, id: u64) -> std::result::Result<(), CloseReason> {
      let mut state = self.state.lock();
      if let Some(reason) = state.closing {
         return Err(reason);
      }
      state.checked_out.insert(id);
      Ok(())
   }

   fn closing_error(&self) -> Error {
      self
         .state
         .lock()
         .closing
         .map_or(Error::PoolClosed, CloseReason::into_error)
   }

   /// Return a checked-out slot.
   ///
   /// Called before the caller's permit is dropped, so the waiter woken by
   /// that permit finds this slot at the front of the idle list.
   pub(crate) fn give_back(self: &Arc<Self>, mut slot: ConnectionSlot<D::Connection>) -> Returned {
      let mut state = self.state.lock();

      if !state.checked_out.remove(&slot.id()) {
         drop(state);
         debug!(path = %self.path.display(), slot = slot.id(), "Closing connection revoked during shutdown");
         self.discard(slot);
         return Returned::Revoked;
      }

      if state.checked_out.is_empty() {
         self.drained.notify_waiters();
      }

      if slot.write_open() {
         drop(state);
         warn!(
            path = %self.path.display(),
            slot = slot.id(),
            "Discarding connection returned with an unfinished write transaction"
         );
         self.discard(slot);
         return Returned::Discarded;
      }

      slot.touch();
      state.idle.push_front(slot);
      Returned::Idle
   }

   /// Close a connection from synchronous code.
   ///
   /// Outside a Tokio runtime the connection is simply dropped, which also
   /// closes the underlying handle.
   fn discard(self: &Arc<Self>, slot: ConnectionSlot<D::Connection>) {
      match tokio::runtime::Handle::try_current() {
         Ok(handle) => {
            let queue = Arc::clone(self);
            handle.spawn(async move { queue.close_slot(slot).await });
         }
         Err(_) => drop(slot),
      }
   }

   pub(crate) async fn close_slot(&self, slot: ConnectionSlot<D::Connection>) {
      let id = slot.id();
      if let Err(e) = self.driver.close(slot.into_conn()).await {
         warn!(path = %self.path.display(), slot = id, "Error closing connection: {}", e);
      }
   }

   /// Remove idle slots unused for longer than `idle_timeout`.
   pub(crate) fn take_expired(&self, idle_timeout: Duration) -> Vec<ConnectionSlot<D::Connection>> {
      let mut state = self.state.lock();
      let (expired, kept): (Vec<_>, Vec<_>) = state
         .idle
         .drain(..)
         .partition(|slot| slot.idle_for() > idle_timeout);
      state.idle = kept.into();
      expired
   }

   /// Remove idle slots unused for at least `probe_after` so they can be probed.
   ///
   /// Each slot comes with a capacity permit, so probing never lets the
   /// queue exceed its cap. Slots are skipped once no permit is free.
   pub(crate) fn take_for_probe(
      &self,
      probe_after: Duration,
   ) -> Vec<(ConnectionSlot<D::Connection>, OwnedSemaphorePermit)> {
      let mut state = self.state.lock();
      if state.closing.is_some() {
         return Vec::new();
      }

      let mut kept = VecDeque::with_capacity(state.idle.len());
      let mut picked = Vec::new();
      for slot in state.idle.drain(..) {
         if slot.idle_for() >= probe_after
            && let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned()
         {
            picked.push((slot, permit));
         } else {
            kept.push_back(slot);
         }
      }
      state.idle = kept;
      picked
   }

   /// Put a probed slot back at the cold end of the idle list.
   ///
   /// Returns the slot if the queue started closing meanwhile.
   pub(crate) fn return_probed(
      &self,
      slot: ConnectionSlot<D::Connection>,
   ) -> Option<ConnectionSlot<D::Connection>> {
      let mut state = self.state.lock();
      if state.closing.is_some() {
         return Some(slot);
      }
      state.idle.push_back(slot);
      None
   }

   /// Stop handing out connections. Waiters fail immediately.
   pub(crate) fn close(&self, reason: CloseReason) {
      {
         let mut state = self.state.lock();
         if state.closing.is_none() {
            state.closing = Some(reason);
         }
      }
      self.permits.close();
   }

   fn active_count(&self) -> usize {
      self.state.lock().checked_out.len()
   }

   /// Resolve once no slot is checked out.
   pub(crate) async fn wait_drained(&self) {
      loop {
         let notified = self.drained.notified();
         tokio::pin!(notified);
         notified.as_mut().enable();

         if self.active_count() == 0 {
            return;
         }
         notified.await;
      }
   }

   /// Forget every checked-out slot; their connections are closed when returned.
   pub(crate) fn revoke_checked_out(&self) -> usize {
      let revoked = {
         let mut state = self.state.lock();
         let revoked = state.checked_out.len();
         state.checked_out.clear();
         revoked
      };
      self.drained.notify_waiters();
      revoked
   }

   fn drain_idle(&self) -> Vec<ConnectionSlot<D::Connection>> {
      self.state.lock().idle.drain(..).collect()
   }

   /// Close every idle connection, checkpointing the file on the first one.
   pub(crate) async fn close_idle(&self) -> usize {
      let slots = self.drain_idle();
      let count = slots.len();

      for (i, mut slot) in slots.into_iter().enumerate() {
         if i == 0
            && let Err(e) = self.driver.checkpoint(slot.conn_mut()).await
         {
            warn!(path = %self.path.display(), "Checkpoint before close failed: {}", e);
         }
         self.close_slot(slot).await;
      }

      count
   }
}
