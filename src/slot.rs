//! A pooled physical connection and its bookkeeping

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One physical connection owned by a file queue.
///
/// While a slot is checked out it lives inside exactly one
/// [`PooledConnection`](crate::PooledConnection); the queue only remembers
/// its id. While idle it sits in the queue's idle list.
#[derive(Debug)]
pub(crate) struct ConnectionSlot<C> {
   conn: C,
   id: u64,
   path: Arc<PathBuf>,
   created_at: Instant,
   last_used_at: Instant,
   /// Set between `begin_write` and the matching commit/rollback
   write_open: bool,
}

impl<C> ConnectionSlot<C> {
   pub(crate) fn new(conn: C, id: u64, path: Arc<PathBuf>) -> Self {
      let now = Instant::now();
      Self {
         conn,
         id,
         path,
         created_at: now,
         last_used_at: now,
         write_open: false,
      }
   }

   pub(crate) fn id(&self) -> u64 {
      self.id
   }

   pub(crate) fn path(&self) -> &Path {
      &self.path
   }

   pub(crate) fn conn(&self) -> &C {
      &self.conn
   }

   pub(crate) fn conn_mut(&mut self) -> &mut C {
      &mut self.conn
   }

   pub(crate) fn into_conn(self) -> C {
      self.conn
   }

   pub(crate) fn age(&self) -> Duration {
      self.created_at.elapsed()
   }

   pub(crate) fn idle_for(&self) -> Duration {
      self.last_used_at.elapsed()
   }

   pub(crate) fn touch(&mut self) {
      self.last_used_at = Instant::now();
   }

   pub(crate) fn write_open(&self) -> bool {
      self.write_open
   }

   pub(crate) fn set_write_open(&mut self, open: bool) {
      self.write_open = open;
   }

   #[cfg(test)]
   pub(crate) fn backdate(&mut self, by: Duration) {
      if let Some(earlier) = self.last_used_at.checked_sub(by) {
         self.last_used_at = earlier;
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_touch_resets_idle_time() {
      let mut slot = ConnectionSlot::new((), 1, Arc::new(PathBuf::from("/tmp/a.db")));
      slot.backdate(Duration::from_secs(60));
      assert!(slot.idle_for() >= Duration::from_secs(60));

      slot.touch();
      assert!(slot.idle_for() < Duration::from_secs(1));
      assert!(slot.age() < Duration::from_secs(1));
   }
}
