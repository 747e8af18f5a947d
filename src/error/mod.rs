//! Error handling module for cursor operations.
//!
//! This module provides:
//! - The [`CursorError`] taxonomy (network, server command, cursor-not-found,
//!   client-side timeout, cancellation, contract violations)
//! - Classification helpers used by the close path to decide whether the
//!   connection is still usable for a kill-cursors round trip
//! - Consistent JSON error formatting for APIs and logging
//!
//! # Example
//!
//! ```rust
//! use mongosh_cursor::error::{CursorError, ErrorInfo};
//!
//! let err = CursorError::network("connection reset by peer");
//! assert!(err.is_network_error());
//!
//! let info = ErrorInfo::from_cursor_error(&err);
//! println!("{}", info.to_json().unwrap());
//! ```

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{
    CURSOR_NOT_FOUND_CODE, CommandError, ConfigError, CursorError, MAX_TIME_MS_EXPIRED_CODE,
    NetworkError, Result, TimeoutError,
};
pub use mongo::{ErrorDetails, ErrorInfo};
