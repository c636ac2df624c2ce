use sqlite_pool_manager::{PoolConfig, PoolManager};
use std::path::PathBuf;
use tempfile::TempDir;

/// Route pool logs to the captured test output
pub fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::DEBUG)
      .with_test_writer()
      .try_init();
}

/// Pool over the SQLx driver with a database file inside a fresh temp dir
pub fn create_test_pool(config: PoolConfig) -> (PoolManager, PathBuf, TempDir) {
   init_tracing();

   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join("test.db");
   let pool = PoolManager::with_config(config).expect("Failed to create pool");

   (pool, db_path, temp_dir)
}
