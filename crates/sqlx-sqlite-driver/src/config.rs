//! Configuration for opening SQLite connections

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`SqlxDriver`](crate::SqlxDriver) connections
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_driver::SqlxDriverConfig;
///
/// // Use defaults
/// let config = SqlxDriverConfig::default();
///
/// // Override just one field
/// let config = SqlxDriverConfig {
///    busy_timeout_ms: 250,
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlxDriverConfig {
   /// How long SQLite waits on a locked database file before returning `SQLITE_BUSY`
   ///
   /// Default: 5000
   pub busy_timeout_ms: u64,

   /// Put the database in WAL journal mode with `synchronous = NORMAL`
   ///
   /// WAL lets readers proceed while the single writer holds its transaction.
   ///
   /// Default: true
   pub wal: bool,

   /// Create the database file when it does not exist yet
   ///
   /// Default: true
   pub create_if_missing: bool,
}

impl SqlxDriverConfig {
   pub fn busy_timeout(&self) -> Duration {
      Duration::from_millis(self.busy_timeout_ms)
   }
}

impl Default for SqlxDriverConfig {
   fn default() -> Self {
      Self {
         busy_timeout_ms: 5_000,
         wal: true,
         create_if_missing: true,
      }
   }
}
