//! Blocking batch cursor.

use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document, Timestamp};
use tracing::{debug, info};

use super::core::{
    CursorCore, CursorResources, MESSAGE_IF_CLOSED_AS_CURSOR, MESSAGE_IF_CLOSED_AS_ITERATOR,
};
use super::interrupt::Interrupt;
use super::server_cursor::{Namespace, ServerCursor};
use super::{CursorOptions, CursorState};
use crate::connection::{Connection, ConnectionSource, ServerAddress};
use crate::error::{CursorError, ErrorInfo, Result};
use crate::timeout::DeadlineContext;

/// Iterates the batches of a server-side cursor, blocking the calling thread
/// for each get-more.
///
/// The cursor retains the connection and source that produced its first
/// batch while a server cursor exists and gives both back exactly once, when
/// the cursor is exhausted, fails or is closed. Dropping the cursor closes it.
pub struct BatchCursor<C: Connection, S: ConnectionSource> {
    core: CursorCore,
    resources: Option<CursorResources<C, S>>,
    deadline: Arc<DeadlineContext>,
    kill_cursors_timeout: Duration,
    interrupt: Interrupt,
}

impl<C: Connection, S: ConnectionSource> BatchCursor<C, S> {
    /// Build a cursor from the reply to the initial find/aggregate.
    ///
    /// # Arguments
    /// * `first_reply` - Command reply carrying `cursor.firstBatch`
    /// * `connection` - Connection the initial command ran on
    /// * `source` - Source that vended `connection`
    /// * `deadline` - Deadline shared with the initial command
    /// * `options` - Limit, batch size and cursor flags
    pub fn new(
        first_reply: &Document,
        connection: &C,
        source: &S,
        deadline: Arc<DeadlineContext>,
        options: CursorOptions,
    ) -> Result<Self> {
        let kill_cursors_timeout = options.kill_cursors_timeout;
        let core = CursorCore::from_first_reply(first_reply, connection.address().clone(), options)?;
        let resources = core
            .server_cursor()
            .is_some()
            .then(|| CursorResources::acquire(connection, source));

        let mut cursor = Self {
            core,
            resources,
            deadline,
            kill_cursors_timeout,
            interrupt: Interrupt::new(),
        };
        if cursor.core.state() == CursorState::Exhausted {
            cursor.release_resources();
        }
        Ok(cursor)
    }

    /// True when [`next`](Self::next) will return a batch, issuing get-mores
    /// until a non-empty batch arrives or the cursor is exhausted.
    pub fn has_next(&mut self) -> Result<bool> {
        self.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        self.core.begin_iteration(&self.deadline);
        self.fill_buffer(MESSAGE_IF_CLOSED_AS_CURSOR)
    }

    /// Next non-empty batch.
    ///
    /// Fails with [`CursorError::NoMoreElements`] once the cursor is exhausted.
    pub fn next(&mut self) -> Result<Vec<Document>> {
        self.check_open(MESSAGE_IF_CLOSED_AS_ITERATOR)?;
        self.core.begin_iteration(&self.deadline);
        if !self.fill_buffer(MESSAGE_IF_CLOSED_AS_ITERATOR)? {
            return Err(CursorError::NoMoreElements);
        }
        self.core.take_batch().ok_or(CursorError::NoMoreElements)
    }

    /// Buffered batch, or the result of at most one get-more.
    ///
    /// `Ok(None)` means no documents are available right now, which for a
    /// tailable cursor does not mean it is exhausted.
    pub fn try_next(&mut self) -> Result<Option<Vec<Document>>> {
        self.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        self.core.begin_iteration(&self.deadline);
        if !self.core.has_buffered() && self.core.can_get_more() {
            self.check_interrupt()?;
            self.fetch_batch(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        }
        Ok(self.core.take_batch())
    }

    /// Close the cursor. Kills the server cursor if one is still open and
    /// releases the retained resources. Calling it again has no effect.
    ///
    /// Another thread closes the cursor through [`Interrupt::close`]; the
    /// close then happens on this cursor's next call.
    pub fn close(&mut self) {
        if self.core.state() == CursorState::Closed && self.resources.is_none() {
            return;
        }
        self.release_resources();
        self.core.mark_closed();
        info!("Closed cursor on {}", self.core.namespace());
    }

    /// Documents buffered locally, retrievable without a round trip.
    pub fn available(&self) -> usize {
        self.core.available()
    }

    /// Live server cursor, `None` once exhausted or closed.
    pub fn server_cursor(&self) -> Option<&ServerCursor> {
        self.core.server_cursor()
    }

    pub fn server_address(&self) -> Result<&ServerAddress> {
        self.core.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        Ok(self.core.address())
    }

    pub fn namespace(&self) -> &Namespace {
        self.core.namespace()
    }

    pub fn state(&self) -> CursorState {
        self.core.state()
    }

    pub fn batch_size(&self) -> i32 {
        self.core.policy().batch_size()
    }

    /// Applies to subsequent get-mores only.
    pub fn set_batch_size(&mut self, batch_size: i32) {
        self.core.policy_mut().set_batch_size(batch_size);
    }

    pub fn limit(&self) -> i32 {
        self.core.policy().limit()
    }

    pub fn comment(&self) -> Option<&Bson> {
        self.core.comment()
    }

    pub fn is_first_batch_empty(&self) -> bool {
        self.core.first_batch_empty()
    }

    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.core.post_batch_resume_token()
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        self.core.operation_time()
    }

    /// Handle another thread can use to abort a blocked call or to close the cursor.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Perform a close requested through the [`Interrupt`] handle, then fail if closed.
    fn check_open(&mut self, message: &'static str) -> Result<()> {
        if self.interrupt.is_close_requested() {
            self.close();
        }
        self.core.check_open(message)
    }

    fn fill_buffer(&mut self, message: &'static str) -> Result<bool> {
        loop {
            if self.core.has_buffered() {
                return Ok(true);
            }
            if !self.core.can_get_more() {
                return Ok(false);
            }
            self.check_interrupt()?;
            self.fetch_batch(message)?;
            // A batch that arrived after the interrupt stays buffered for the next call.
            self.check_interrupt()?;
        }
    }

    /// One get-more, honouring an interrupt or close request raised while it ran.
    fn fetch_batch(&mut self, message: &'static str) -> Result<()> {
        match self.get_more() {
            Ok(()) => self.check_open(message),
            Err(e) if e.is_cancellation() => {
                self.interrupt.take();
                self.check_open(message)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.take() {
            Err(CursorError::Cancelled(
                "Interrupted while waiting for the next batch".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn get_more(&mut self) -> Result<()> {
        let pending = self.core.begin_get_more(&self.deadline);
        let connection = self.resources.as_ref().and_then(CursorResources::connection);
        let result = match (pending, connection) {
            (Ok(pending), Some(connection)) => connection.command(
                &pending.database,
                pending.command,
                &self.deadline,
                &self.interrupt,
            ),
            (Ok(_), None) => Err(CursorError::Closed(MESSAGE_IF_CLOSED_AS_CURSOR)),
            (Err(e), _) => Err(e),
        };

        let outcome = self.core.complete_get_more(result);
        if self.core.state() != CursorState::Active {
            self.release_resources();
        }
        outcome
    }

    /// Kill the server cursor if required, then give back connection and source.
    fn release_resources(&mut self) {
        let kill = self.core.take_kill_cursors();
        let Some(resources) = self.resources.take() else {
            return;
        };

        if let (Some(pending), Some(connection)) = (kill, resources.connection()) {
            let deadline = &self.deadline;
            // killCursors runs to completion even when a close was requested.
            let uninterruptible = Interrupt::new();
            let result = deadline.run_with_max_time(self.kill_cursors_timeout, || {
                connection.command(
                    &pending.database,
                    pending.command,
                    deadline,
                    &uninterruptible,
                )
            });
            match result {
                Ok(_) => debug!("Killed cursor on {}", self.core.namespace()),
                Err(e) => debug!(
                    error = %ErrorInfo::from_cursor_error(&e).summary(),
                    "killCursors on {} failed",
                    self.core.namespace()
                ),
            }
        }
        resources.release();
    }
}

impl<C: Connection, S: ConnectionSource> Drop for BatchCursor<C, S> {
    fn drop(&mut self) {
        if self.core.state() != CursorState::Closed || self.resources.is_some() {
            debug!("BatchCursor dropped without explicit close");
            self.close();
        }
    }
}
