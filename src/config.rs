//! Configuration for the pool manager

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for [`PoolManager`](crate::PoolManager)
///
/// All durations are in milliseconds. Missing fields take their defaults
/// when deserialized.
///
/// # Examples
///
/// ```
/// use sqlite_pool_manager::PoolConfig;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_connections_per_file: 1,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Maximum number of connections, checked out or idle, per database file
   ///
   /// Default: 5
   pub max_connections_per_file: u32,

   /// Idle connections older than this are closed by the health monitor
   ///
   /// Default: 600000 (10 minutes)
   pub idle_timeout_ms: u64,

   /// How long `acquire` waits for a connection before failing with
   /// [`Error::PoolExhausted`]
   ///
   /// Default: 5000
   pub acquire_timeout_ms: u64,

   /// Interval between health monitor sweeps
   ///
   /// Default: 60000
   pub health_check_interval_ms: u64,

   /// Idle connections older than this are probed on each sweep
   ///
   /// Default: `None`, meaning half of `idle_timeout_ms`
   pub probe_after_ms: Option<u64>,

   /// How long shutdown waits for checked-out connections before revoking them
   ///
   /// Default: 30000
   pub shutdown_grace_period_ms: u64,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_connections_per_file: 5,
         idle_timeout_ms: 10 * 60 * 1_000,
         acquire_timeout_ms: 5_000,
         health_check_interval_ms: 60_000,
         probe_after_ms: None,
         shutdown_grace_period_ms: 30_000,
      }
   }
}

impl PoolConfig {
   /// Reject settings the pool cannot run with.
   pub fn validate(&self) -> Result<()> {
      if self.max_connections_per_file == 0 {
         return Err(Error::InvalidConfig(
            "max_connections_per_file must be greater than 0".to_string(),
         ));
      }
      if self.acquire_timeout_ms == 0 {
         return Err(Error::InvalidConfig(
            "acquire_timeout_ms must be greater than 0".to_string(),
         ));
      }
      if self.idle_timeout_ms == 0 {
         return Err(Error::InvalidConfig(
            "idle_timeout_ms must be greater than 0".to_string(),
         ));
      }
      if self.health_check_interval_ms == 0 {
         return Err(Error::InvalidConfig(
            "health_check_interval_ms must be greater than 0".to_string(),
         ));
      }
      if let Some(probe_after) = self.probe_after_ms
         && probe_after > self.idle_timeout_ms
      {
         return Err(Error::InvalidConfig(format!(
            "probe_after_ms ({probe_after}) must not exceed idle_timeout_ms ({})",
            self.idle_timeout_ms
         )));
      }
      Ok(())
   }

   pub fn max_connections(&self) -> usize {
      self.max_connections_per_file as usize
   }

   pub fn idle_timeout(&self) -> Duration {
      Duration::from_millis(self.idle_timeout_ms)
   }

   pub fn acquire_timeout(&self) -> Duration {
      Duration::from_millis(self.acquire_timeout_ms)
   }

   pub fn health_check_interval(&self) -> Duration {
      Duration::from_millis(self.health_check_interval_ms)
   }

   pub fn probe_after(&self) -> Duration {
      Duration::from_millis(self.probe_after_ms.unwrap_or(self.idle_timeout_ms / 2))
   }

   pub fn shutdown_grace_period(&self) -> Duration {
      Duration::from_millis(self.shutdown_grace_period_ms)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = PoolConfig::default();

      assert_eq!(config.max_connections(), 5);
      assert_eq!(config.idle_timeout(), Duration::from_secs(600));
      assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
      assert_eq!(config.health_check_interval(), Duration::from_secs(60));
      assert_eq!(config.probe_after(), Duration::from_secs(300));
      assert_eq!(config.shutdown_grace_period(), Duration::from_secs(30));
      config.validate().unwrap();
   }

   #[test]
   fn test_partial_json_fills_defaults() {
      let config: PoolConfig =
         serde_json::from_str(r#"{ "max_connections_per_file": 1, "acquire_timeout_ms": 100 }"#)
            .unwrap();

      assert_eq!(config.max_connections(), 1);
      assert_eq!(config.acquire_timeout(), Duration::from_millis(100));
      assert_eq!(config.idle_timeout_ms, PoolConfig::default().idle_timeout_ms);
   }

   #[test]
   fn test_validate_rejects_zero_values() {
      let zero_connections = PoolConfig {
         max_connections_per_file: 0,
         ..Default::default()
      };
      assert!(matches!(
         zero_connections.validate(),
         Err(Error::InvalidConfig(_))
      ));

      let zero_timeout = PoolConfig {
         acquire_timeout_ms: 0,
         ..Default::default()
      };
      assert!(matches!(zero_timeout.validate(), Err(Error::InvalidConfig(_))));

      let zero_interval = PoolConfig {
         health_check_interval_ms: 0,
         ..Default::default()
      };
      assert!(matches!(
         zero_interval.validate(),
         Err(Error::InvalidConfig(_))
      ));
   }

   #[test]
   fn test_validate_rejects_probe_after_idle_timeout() {
      let config = PoolConfig {
         idle_timeout_ms: 1_000,
         probe_after_ms: Some(2_000),
         ..Default::default()
      };

      assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
   }
}
