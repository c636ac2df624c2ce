//! [`Driver`] implementation over sqlx's `SqliteConnection`

use crate::Result;
use crate::config::SqlxDriverConfig;
use crate::driver::{Driver, is_memory_database};
use crate::error::Error;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection};
use std::path::Path;
use tracing::trace;

/// Opens plain read-write `SqliteConnection`s.
///
/// Every connection is opened with the configured busy timeout and, unless
/// disabled, WAL journaling with `synchronous = NORMAL`. Writes are bracketed
/// with `BEGIN IMMEDIATE` so the SQLite write lock is taken up front rather
/// than on the first modifying statement.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_driver::{Driver, SqlxDriver};
/// use std::path::Path;
///
/// # async fn example() -> sqlx_sqlite_driver::Result<()> {
/// let driver = SqlxDriver::default();
/// let mut conn = driver.open(Path::new("app.db")).await?;
///
/// sqlx::query("CREATE TABLE IF NOT EXISTS users (name TEXT)")
///    .execute(&mut conn)
///    .await?;
///
/// driver.close(conn).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SqlxDriver {
   config: SqlxDriverConfig,
}

impl SqlxDriver {
   pub fn new(config: SqlxDriverConfig) -> Self {
      Self { config }
   }

   pub fn config(&self) -> &SqlxDriverConfig {
      &self.config
   }

   fn connect_options(&self, path: &Path) -> SqliteConnectOptions {
      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(self.config.create_if_missing)
         .busy_timeout(self.config.busy_timeout());

      // WAL is meaningless for in-memory databases
      if self.config.wal && !is_memory_database(path) {
         // https://www.sqlite.org/wal.html#performance_considerations
         options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
      } else {
         options
      }
   }
}

impl Driver for SqlxDriver {
   type Connection = SqliteConnection;

   async fn open(&self, path: &Path) -> Result<SqliteConnection> {
      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let conn = self.connect_options(path).connect().await?;
      trace!(path = %path.display(), "Opened SQLite connection");

      Ok(conn)
   }

   async fn close(&self, conn: SqliteConnection) -> Result<()> {
      conn.close().await?;
      Ok(())
   }

   async fn probe(&self, conn: &mut SqliteConnection) -> Result<()> {
      sqlx::query("SELECT 1").execute(&mut *conn).await?;
      Ok(())
   }

   async fn begin_write(&self, conn: &mut SqliteConnection) -> Result<()> {
      sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
      Ok(())
   }

   async fn commit(&self, conn: &mut SqliteConnection) -> Result<()> {
      sqlx::query("COMMIT").execute(&mut *conn).await?;
      Ok(())
   }

   async fn rollback(&self, conn: &mut SqliteConnection) -> Result<()> {
      sqlx::query("ROLLBACK").execute(&mut *conn).await?;
      Ok(())
   }

   async fn checkpoint(&self, conn: &mut SqliteConnection) -> Result<()> {
      if self.config.wal {
         sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await?;
      }
      Ok(())
   }
}
