//! # sqlx-sqlite-driver
//!
//! The narrow driver seam a SQLite connection pool sits on, plus its SQLx
//! implementation.
//!
//! ## Core Types
//!
//! - **[`Driver`]**: open / close / probe / begin_write / commit / rollback / checkpoint
//! - **[`SqlxDriver`]**: `Driver` over sqlx's `SqliteConnection`
//! - **[`SqlxDriverConfig`]**: busy timeout, WAL and file creation settings
//! - **[`Error`]**: Error type for driver operations
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlite_driver::{Driver, SqlxDriver};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_driver::Result<()> {
//!    let driver = SqlxDriver::default();
//!    let mut conn = driver.open(Path::new("example.db")).await?;
//!
//!    driver.begin_write(&mut conn).await?;
//!    sqlx::query("INSERT INTO users (name) VALUES (?)")
//!       .bind("Alice")
//!       .execute(&mut conn)
//!       .await?;
//!    driver.commit(&mut conn).await?;
//!
//!    driver.close(conn).await?;
//!    Ok(())
//! }
//! ```
//!
mod config;
mod driver;
mod error;
mod sqlx_driver;

// Re-export public types
pub use config::SqlxDriverConfig;
pub use driver::{Driver, is_memory_database};
pub use error::Error;
pub use sqlx_driver::SqlxDriver;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
