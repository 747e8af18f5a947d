//! Client-side deadline tracking for cursor round trips
//!
//! A [`DeadlineContext`] is shared by every command an operation issues: the
//! initial command, each get-more and the final kill-cursors. It carries an
//! optional overall deadline plus a scoped max-time override that the close
//! path installs for exactly one command through [`MaxTimeGuard`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{CursorError, Result};

/// How the overall deadline relates to cursor iteration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutMode {
    /// The deadline spans the whole lifetime of the cursor.
    #[default]
    CursorLifetime,

    /// The deadline is restarted at every `next`/`has_next`/`try_next` call.
    Iteration,
}

impl TimeoutMode {
    /// Parse the textual form used in config files and environment variables.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cursor_lifetime" | "cursorlifetime" | "lifetime" => Some(TimeoutMode::CursorLifetime),
            "iteration" => Some(TimeoutMode::Iteration),
            _ => None,
        }
    }
}

/// Overall deadline plus scoped per-command override.
#[derive(Debug, Default)]
pub struct DeadlineContext {
    /// Configured timeout; used to restart the deadline in iteration mode.
    timeout: Option<Duration>,

    /// Instant after which outgoing commands fail with a timeout.
    deadline: RwLock<Option<Instant>>,

    /// Ceiling for the next outgoing command only.
    max_time_override: RwLock<Option<Duration>>,
}

impl DeadlineContext {
    /// Create a context whose deadline starts now and lasts `timeout`.
    ///
    /// `None` means no overall deadline.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: RwLock::new(timeout.map(|t| Instant::now() + t)),
            max_time_override: RwLock::new(None),
        }
    }

    /// Create a context without any deadline.
    pub fn infinite() -> Self {
        Self::new(None)
    }

    /// Create a context that expires at a fixed instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            timeout: Some(deadline.saturating_duration_since(Instant::now())),
            deadline: RwLock::new(Some(deadline)),
            max_time_override: RwLock::new(None),
        }
    }

    /// Configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// True when an overall deadline is set.
    pub fn has_deadline(&self) -> bool {
        self.deadline().is_some()
    }

    /// True when the overall deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left until the overall deadline.
    ///
    /// Returns `Ok(None)` when no deadline is set and a timeout error when it
    /// has already passed.
    pub fn remaining(&self) -> Result<Option<Duration>> {
        match self.deadline() {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(CursorError::timeout(format!(
                        "Operation exceeded its deadline by {:?}",
                        now - deadline
                    )))
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }

    /// Override currently installed for the next command.
    pub fn max_time_override(&self) -> Option<Duration> {
        *self
            .max_time_override
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bound for the next outgoing command's round trip.
    ///
    /// The scoped override wins over the overall deadline, so cleanup can run
    /// even after the operation itself ran out of time.
    pub fn command_timeout(&self) -> Result<Option<Duration>> {
        match self.max_time_override() {
            Some(max_time) => Ok(Some(max_time)),
            None => self.remaining(),
        }
    }

    /// `maxTimeMS` value for the next command, rounded up to whole milliseconds.
    pub fn max_time_ms(&self) -> Result<Option<i64>> {
        Ok(self.command_timeout()?.map(duration_to_millis))
    }

    /// Restart the overall deadline from the configured timeout.
    pub fn reset(&self) {
        if let Some(timeout) = self.timeout {
            *self.deadline.write().unwrap_or_else(PoisonError::into_inner) =
                Some(Instant::now() + timeout);
        }
    }

    /// Install `max_time` as the ceiling until the returned guard is dropped.
    pub fn with_max_time(&self, max_time: Duration) -> MaxTimeGuard<'_> {
        let mut slot = self
            .max_time_override
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = slot.replace(max_time);
        MaxTimeGuard {
            context: self,
            previous,
        }
    }

    /// Run `f` with `max_time` installed, restoring the prior state on every exit path.
    pub fn run_with_max_time<R>(&self, max_time: Duration, f: impl FnOnce() -> R) -> R {
        let _guard = self.with_max_time(max_time);
        f()
    }

    /// Async form of [`run_with_max_time`](Self::run_with_max_time).
    ///
    /// Dropping the returned future before completion also restores the prior state.
    pub async fn run_with_max_time_async<F>(&self, max_time: Duration, fut: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.with_max_time(max_time);
        fut.await
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the previous max-time override when dropped.
#[must_use = "the override is removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct MaxTimeGuard<'a> {
    context: &'a DeadlineContext,
    previous: Option<Duration>,
}

impl Drop for MaxTimeGuard<'_> {
    fn drop(&mut self) {
        *self
            .context
            .max_time_override
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.previous;
    }
}

/// Convert a duration to whole milliseconds, rounding up so that a sub-millisecond
/// remainder never turns into "no limit".
pub fn duration_to_millis(duration: Duration) -> i64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    i64::try_from(millis).unwrap_or(i64::MAX)
}
