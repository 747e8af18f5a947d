//! Interruption of a blocking cursor from another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Flags {
    interrupted: AtomicBool,
    close_requested: AtomicBool,
}

/// Cloneable handle that asks a blocked [`BatchCursor`](super::BatchCursor) to stop.
///
/// The handle is passed down to [`Connection::command`](crate::connection::Connection::command)
/// so a get-more waiting for data returns as soon as it fires.
///
/// - [`interrupt`](Self::interrupt) aborts one call. The cursor stays usable.
/// - [`close`](Self::close) aborts the current call and closes the cursor once
///   that round trip has settled. Every later call fails with `Closed`.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flags: Arc<Flags>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption of the current or next blocking call.
    pub fn interrupt(&self) {
        self.flags.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flags.interrupted.load(Ordering::SeqCst)
    }

    /// Request that the cursor be closed by the thread that owns it.
    pub fn close(&self) {
        self.flags.close_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_close_requested(&self) -> bool {
        self.flags.close_requested.load(Ordering::SeqCst)
    }

    /// True when a wait in progress should give up.
    pub fn should_stop(&self) -> bool {
        self.is_interrupted() || self.is_close_requested()
    }

    /// Clear the interrupt, returning whether it was set. A close request is never cleared.
    pub(crate) fn take(&self) -> bool {
        self.flags.interrupted.swap(false, Ordering::SeqCst)
    }
}
