//! Optional process-wide pool over the default driver

use std::sync::OnceLock;

use crate::Result;
use crate::config::PoolConfig;
use crate::manager::PoolManager;

static GLOBAL: OnceLock<PoolManager> = OnceLock::new();

/// Install the process-wide pool, or return the one already installed.
///
/// `config` is only used by the first successful call. Once the global pool
/// has been shut down it stays closed for the rest of the process.
pub fn init_global(config: PoolConfig) -> Result<&'static PoolManager> {
   if let Some(existing) = GLOBAL.get() {
      return Ok(existing);
   }

   let manager = PoolManager::with_config(config)?;
   Ok(GLOBAL.get_or_init(|| manager))
}

/// The process-wide pool, if [`init_global`] has run.
pub fn global() -> Option<&'static PoolManager> {
   GLOBAL.get()
}
