//! Batch cursors over server-side query results
//!
//! A find or aggregate that returns more results than fit in one reply leaves
//! a cursor open on the server. This module iterates it:
//! - [`BatchCursor`]: blocking iteration, interruptible through [`Interrupt`]
//! - [`AsyncBatchCursor`]: async iteration, also exposed as a stream
//!
//! Both flavours drive the same state machine, so limit handling, get-more
//! construction, error translation and the kill-cursors decision are shared.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongosh_cursor::connection::{DriverConnection, DriverConnectionSource};
//! use mongosh_cursor::cursor::{AsyncBatchCursor, CursorOptions};
//! use mongosh_cursor::timeout::DeadlineContext;
//!
//! # async fn run(
//! #     source: DriverConnectionSource,
//! #     first_reply: bson::Document,
//! # ) -> mongosh_cursor::Result<()> {
//! let connection: DriverConnection = source.connection();
//! let cursor = AsyncBatchCursor::new(
//!     &first_reply,
//!     &connection,
//!     &source,
//!     Arc::new(DeadlineContext::infinite()),
//!     CursorOptions::default().with_batch_size(100),
//! )
//! .await?;
//!
//! while cursor.has_next().await? {
//!     let batch = cursor.next().await?;
//!     println!("{} documents", batch.len());
//! }
//! cursor.close().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bson::Bson;

use crate::config::{CursorConfig, default_kill_cursors_timeout_ms, default_max_await_time_ms};
use crate::error::{CursorError, Result};
use crate::timeout::TimeoutMode;

mod async_cursor;
mod commands;
mod core;
mod interrupt;
mod policy;
mod reply;
mod server_cursor;
mod sync_cursor;

#[cfg(test)]
mod mock;

pub use async_cursor::AsyncBatchCursor;
pub use commands::{get_more_command, kill_cursors_command};
pub use interrupt::Interrupt;
pub use policy::LimitPolicy;
pub use server_cursor::{Namespace, ServerCursor};
pub use sync_cursor::BatchCursor;

/// Lifecycle of a cursor.
///
/// `Active` may move to `Exhausted` or `Closed`, `Exhausted` only to `Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// More batches may be fetched from the server.
    Active,

    /// The server has no more batches; buffered documents may remain.
    Exhausted,

    /// Closed by the caller or by a failure.
    Closed,
}

/// Per-cursor settings.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    /// Maximum documents to return; negative means a single batch. 0 for no limit.
    pub limit: i32,

    /// Documents per batch; negative means a single batch. 0 lets the server decide.
    pub batch_size: i32,

    /// The cursor stays open after the last document.
    pub tailable: bool,

    /// Get-mores on a tailable cursor block on the server for new data.
    pub await_data: bool,

    /// Server-side wait per get-more for tailable await cursors.
    pub max_await_time: Option<Duration>,

    /// Copied onto every get-more.
    pub comment: Option<Bson>,

    pub timeout_mode: TimeoutMode,

    /// Ceiling for the kill-cursors round trip on close.
    pub kill_cursors_timeout: Duration,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            batch_size: 0,
            tailable: false,
            await_data: false,
            max_await_time: Some(Duration::from_millis(default_max_await_time_ms())),
            comment: None,
            timeout_mode: TimeoutMode::default(),
            kill_cursors_timeout: Duration::from_millis(default_kill_cursors_timeout_ms()),
        }
    }
}

impl CursorOptions {
    /// Options seeded from configured defaults.
    pub fn from_config(config: &CursorConfig) -> Self {
        Self {
            limit: 0,
            batch_size: config.default_batch_size,
            tailable: false,
            await_data: false,
            max_await_time: Some(config.max_await_time()),
            comment: None,
            timeout_mode: config.timeout_mode,
            kill_cursors_timeout: config.kill_cursors_timeout(),
        }
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Mark the cursor tailable, optionally awaiting new data on the server.
    pub fn tailable(mut self, await_data: bool) -> Self {
        self.tailable = true;
        self.await_data = await_data;
        self
    }

    pub fn with_max_await_time(mut self, max_await_time: Duration) -> Self {
        self.max_await_time = Some(max_await_time);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<Bson>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_timeout_mode(mut self, timeout_mode: TimeoutMode) -> Self {
        self.timeout_mode = timeout_mode;
        self
    }

    pub fn with_kill_cursors_timeout(mut self, timeout: Duration) -> Self {
        self.kill_cursors_timeout = timeout;
        self
    }

    /// Reject combinations the server would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.await_data && !self.tailable {
            return Err(CursorError::InvalidArgument(
                "await_data requires a tailable cursor".to_string(),
            ));
        }
        if self.kill_cursors_timeout.is_zero() {
            return Err(CursorError::InvalidArgument(
                "kill_cursors_timeout must be greater than zero".to_string(),
            ));
        }
        if self.tailable && self.limit < 0 {
            return Err(CursorError::InvalidArgument(
                "a tailable cursor cannot return a single batch".to_string(),
            ));
        }
        Ok(())
    }
}
