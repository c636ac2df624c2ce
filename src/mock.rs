//! In-process driver for exercising pool logic without SQLite

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sqlx_sqlite_driver::{Driver, Error, Result};

#[derive(Debug)]
pub(crate) struct MockConnection {
   pub(crate) id: usize,
}

#[derive(Debug, Default)]
struct MockState {
   opened: AtomicUsize,
   closed: AtomicUsize,
   fail_open: AtomicBool,
   fail_probe: AtomicBool,
   fail_begin: AtomicBool,
   fail_commit: AtomicBool,
   begin_delay_ms: AtomicU64,
   calls: Mutex<Vec<String>>,
}

/// Counts opens and closes and can be told to fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDriver {
   state: Arc<MockState>,
}

impl MockDriver {
   pub(crate) fn opened(&self) -> usize {
      self.state.opened.load(Ordering::SeqCst)
   }

   pub(crate) fn closed(&self) -> usize {
      self.state.closed.load(Ordering::SeqCst)
   }

   pub(crate) fn set_fail_open(&self, fail: bool) {
      self.state.fail_open.store(fail, Ordering::SeqCst);
   }

   pub(crate) fn set_fail_probe(&self, fail: bool) {
      self.state.fail_probe.store(fail, Ordering::SeqCst);
   }

   pub(crate) fn set_fail_begin(&self, fail: bool) {
      self.state.fail_begin.store(fail, Ordering::SeqCst);
   }

   /// Make `begin_write` take this long before it returns
   pub(crate) fn set_begin_delay(&self, delay: Duration) {
      self.state.begin_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
   }

   pub(crate) fn set_fail_commit(&self, fail: bool) {
      self.state.fail_commit.store(fail, Ordering::SeqCst);
   }

   /// Write-transaction calls in the order they happened, e.g. `begin:1`
   pub(crate) fn calls(&self) -> Vec<String> {
      self.state.calls.lock().clone()
   }

   fn record(&self, call: &str, conn: &MockConnection) {
      self.state.calls.lock().push(format!("{call}:{}", conn.id));
   }
}

fn failure(what: &str) -> Error {
   Error::Io(std::io::Error::other(format!("mock {what} failure")))
}

impl Driver for MockDriver {
   type Connection = MockConnection;

   async fn open(&self, _path: &Path) -> Result<MockConnection> {
      if self.state.fail_open.load(Ordering::SeqCst) {
         return Err(failure("open"));
      }
      let id = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
      Ok(MockConnection { id })
   }

   async fn close(&self, _conn: MockConnection) -> Result<()> {
      self.state.closed.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   async fn probe(&self, conn: &mut MockConnection) -> Result<()> {
      self.record("probe", conn);
      if self.state.fail_probe.load(Ordering::SeqCst) {
         return Err(failure("probe"));
      }
      Ok(())
   }

   async fn begin_write(&self, conn: &mut MockConnection) -> Result<()> {
      self.record("begin", conn);
      let delay = self.state.begin_delay_ms.load(Ordering::SeqCst);
      if delay > 0 {
         tokio::time::sleep(Duration::from_millis(delay)).await;
      }
      if self.state.fail_begin.load(Ordering::SeqCst) {
         return Err(failure("begin"));
      }
      Ok(())
   }

   async fn commit(&self, conn: &mut MockConnection) -> Result<()> {
      self.record("commit", conn);
      if self.state.fail_commit.load(Ordering::SeqCst) {
         return Err(failure("commit"));
      }
      Ok(())
   }

   async fn rollback(&self, conn: &mut MockConnection) -> Result<()> {
      self.record("rollback", conn);
      Ok(())
   }
}
