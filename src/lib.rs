//! MongoDB Shell Cursor Library
//!
//! This library provides the batch cursor core used by the MongoDB Shell (mongosh)
//! implementation: iterating server-side cursors with get-more, enforcing
//! client-side deadlines, and releasing server and client resources exactly once.
//!
//! # Modules
//!
//! - `config`: Configuration management
//! - `connection`: Reference-counted connections and connection sources
//! - `cursor`: Sync and async batch cursors
//! - `error`: Error types and handling
//! - `operation`: Operation correlation comments
//! - `timeout`: Deadline tracking and scoped max-time overrides
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongosh_cursor::config::Config;
//! use mongosh_cursor::connection::{DriverConnectionSource, ServerAddress};
//! use mongosh_cursor::cursor::{AsyncBatchCursor, CursorOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     config.logging.init_tracing();
//!
//!     let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//!     let source = DriverConnectionSource::new(client, ServerAddress::parse("localhost:27017")?);
//!     let connection = source.connection();
//!
//!     let reply = source
//!         .client()
//!         .database("test")
//!         .run_command(bson::doc! { "find": "items", "batchSize": 100 })
//!         .await?;
//!
//!     let cursor = AsyncBatchCursor::new(
//!         &reply,
//!         &connection,
//!         &source,
//!         Arc::new(config.cursor.new_deadline()),
//!         CursorOptions::from_config(&config.cursor).with_batch_size(100),
//!     )
//!     .await?;
//!
//!     while cursor.has_next().await? {
//!         println!("{} documents", cursor.next().await?.len());
//!     }
//!     cursor.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod operation;
pub mod timeout;

// Re-export commonly used types
pub use config::Config;
pub use cursor::{AsyncBatchCursor, BatchCursor, CursorOptions, CursorState};
pub use error::{CursorError, Result};
pub use timeout::DeadlineContext;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
