//! The capability a connection pool needs from a database driver

use crate::Result;
use std::future::Future;
use std::path::Path;

/// Opens, checks and closes physical connections to SQLite database files.
///
/// A pool built on this trait never looks inside a connection. It only needs
/// to create one, confirm it is still alive, bracket a write transaction and
/// eventually close it. Query execution stays with the caller, who gets the
/// `Connection` itself.
///
/// Implementations must be cheap to share across tasks; the pool holds a
/// single instance for the lifetime of the process.
pub trait Driver: Send + Sync + 'static {
   /// The native connection handle handed to callers
   type Connection: Send + 'static;

   /// Open a new physical connection to the database file at `path`
   fn open(&self, path: &Path) -> impl Future<Output = Result<Self::Connection>> + Send;

   /// Close a connection, flushing whatever the driver buffers
   fn close(&self, conn: Self::Connection) -> impl Future<Output = Result<()>> + Send;

   /// Cheap liveness check on an idle connection
   fn probe(&self, conn: &mut Self::Connection) -> impl Future<Output = Result<()>> + Send;

   /// Start a write transaction that holds the file's write lock until commit or rollback
   fn begin_write(&self, conn: &mut Self::Connection)
   -> impl Future<Output = Result<()>> + Send;

   fn commit(&self, conn: &mut Self::Connection) -> impl Future<Output = Result<()>> + Send;

   fn rollback(&self, conn: &mut Self::Connection) -> impl Future<Output = Result<()>> + Send;

   /// Flush journal state before the last connection to a file goes away
   ///
   /// Drivers without a journal to flush keep the default no-op.
   fn checkpoint(&self, conn: &mut Self::Connection) -> impl Future<Output = Result<()>> + Send {
      let _ = conn;
      async { Ok(()) }
   }
}

/// Whether `path` names an in-memory database rather than a file
pub fn is_memory_database(path: &Path) -> bool {
   match path.to_str() {
      Some(s) => s == ":memory:" || s.starts_with("file::memory:") || s.contains("mode=memory"),
      None => false,
   }
}
