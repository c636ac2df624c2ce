//! Path → queue map shared by every caller of one pool manager

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx_sqlite_driver::Driver;
use tracing::debug;

use crate::queue::{FileQueue, WriteLock};
use crate::{Error, Result};

struct RegistryState<D: Driver> {
   queues: HashMap<PathBuf, Arc<FileQueue<D>>>,
   /// Kept across queue replacement so writers on a closed queue and its
   /// successor still exclude each other
   write_locks: HashMap<PathBuf, Arc<WriteLock>>,
   closed: bool,
}

/// Lazily creates one [`FileQueue`] per database path.
///
/// The map has its own lock, independent of every queue's internal lock, so
/// looking up one file never contends with traffic on another.
pub(crate) struct PoolRegistry<D: Driver> {
   pool_id: u64,
   driver: Arc<D>,
   max_connections: usize,
   state: RwLock<RegistryState<D>>,
}

impl<D: Driver> PoolRegistry<D> {
   pub(crate) fn new(pool_id: u64, driver: Arc<D>, max_connections: usize) -> Self {
      Self {
         pool_id,
         driver,
         max_connections,
         state: RwLock::new(RegistryState {
            queues: HashMap::new(),
            write_locks: HashMap::new(),
            closed: false,
         }),
      }
   }

   /// Return the queue for `path`, creating it on first access.
   ///
   /// Concurrent first access for the same path yields the same queue.
   pub(crate) fn get_or_create(&self, path: &Path) -> Result<Arc<FileQueue<D>>> {
      {
         let state = self.state.read();
         if state.closed {
            return Err(Error::PoolShuttingDown);
         }
         if let Some(queue) = state.queues.get(path) {
            return Ok(Arc::clone(queue));
         }
      }

      let mut state = self.state.write();
      if state.closed {
         return Err(Error::PoolShuttingDown);
      }

      let RegistryState { queues, write_locks, .. } = &mut *state;

      // Another caller may have won the race between the two locks
      let queue = queues.entry(path.to_path_buf()).or_insert_with(|| {
         debug!(path = %path.display(), max_connections = self.max_connections, "Creating file queue");
         let write_lock = write_locks.entry(path.to_path_buf()).or_default();
         Arc::new(FileQueue::new(
            self.pool_id,
            path.to_path_buf(),
            self.max_connections,
            Arc::clone(&self.driver),
            Arc::clone(write_lock),
         ))
      });

      Ok(Arc::clone(queue))
   }

   pub(crate) fn get(&self, path: &Path) -> Option<Arc<FileQueue<D>>> {
      self.state.read().queues.get(path).cloned()
   }

   /// Drop `queue` from the map if it is still the one registered for `path`.
   ///
   /// A closing queue stays registered until it has drained, so callers for
   /// the same path are refused instead of getting a second queue.
   pub(crate) fn remove_if_current(&self, path: &Path, queue: &Arc<FileQueue<D>>) -> bool {
      let mut state = self.state.write();
      match state.queues.get(path) {
         Some(current) if Arc::ptr_eq(current, queue) => {
            state.queues.remove(path);
            true
         }
         _ => false,
      }
   }

   pub(crate) fn snapshot(&self) -> Vec<Arc<FileQueue<D>>> {
      self.state.read().queues.values().cloned().collect()
   }

   /// Refuse further queue creation and hand back every existing queue.
   pub(crate) fn close(&self) -> Vec<Arc<FileQueue<D>>> {
      let mut state = self.state.write();
      state.closed = true;
      state.write_locks.clear();
      state.queues.drain().map(|(_, queue)| queue).collect()
   }

   #[cfg(test)]
   pub(crate) fn len(&self) -> usize {
      self.state.read().queues.len()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::mock::MockDriver;

   fn registry() -> Arc<PoolRegistry<MockDriver>> {
      Arc::new(PoolRegistry::new(1, Arc::new(MockDriver::default()), 2))
   }

   #[test]
   fn test_same_path_returns_same_queue() {
      let registry = registry();

      let a = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      let again = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      let b = registry.get_or_create(Path::new("/tmp/b.db")).unwrap();

      assert!(Arc::ptr_eq(&a, &again));
      assert!(!Arc::ptr_eq(&a, &b));
      assert_eq!(registry.len(), 2);
   }

   #[test]
   fn test_concurrent_first_access_creates_one_queue() {
      let registry = registry();
      let barrier = Arc::new(std::sync::Barrier::new(8));

      let handles: Vec<_> = (0..8)
         .map(|_| {
            let (registry, barrier) = (Arc::clone(&registry), Arc::clone(&barrier));
            std::thread::spawn(move || {
               barrier.wait();
               registry.get_or_create(Path::new("/tmp/race.db")).unwrap()
            })
         })
         .collect();

      let queues: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

      assert!(queues.iter().all(|q| Arc::ptr_eq(q, &queues[0])));
      assert_eq!(registry.len(), 1);
   }

   #[test]
   fn test_remove_then_recreate_yields_new_queue() {
      let registry = registry();

      let first = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      assert!(registry.remove_if_current(Path::new("/tmp/a.db"), &first));
      assert!(registry.get(Path::new("/tmp/a.db")).is_none());

      let second = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      assert!(!Arc::ptr_eq(&first, &second));

      // A stale handle never removes its successor
      assert!(!registry.remove_if_current(Path::new("/tmp/a.db"), &first));
      assert!(registry.get(Path::new("/tmp/a.db")).is_some());
   }

   #[test]
   fn test_write_lock_survives_queue_replacement() {
      let registry = registry();

      let first = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      assert!(registry.remove_if_current(Path::new("/tmp/a.db"), &first));
      let second = registry.get_or_create(Path::new("/tmp/a.db")).unwrap();
      let other = registry.get_or_create(Path::new("/tmp/b.db")).unwrap();

      let _held = first.write_lock().try_lock().unwrap();
      assert!(second.write_lock().try_lock().is_err());
      assert!(other.write_lock().try_lock().is_ok());
   }

   #[test]
   fn test_closed_registry_refuses_new_queues() {
      let registry = registry();
      registry.get_or_create(Path::new("/tmp/a.db")).unwrap();

      let drained = registry.close();
      assert_eq!(drained.len(), 1);
      assert_eq!(registry.len(), 0);

      let result = registry.get_or_create(Path::new("/tmp/a.db"));
      assert!(matches!(result, Err(Error::PoolShuttingDown)));
   }
}
