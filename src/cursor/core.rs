//! The cursor state machine, free of any I/O.
//!
//! [`CursorCore`] decides what the next command is and how a reply or failure
//! changes the cursor. The blocking and async adapters only differ in how they
//! wait for the command to complete, so they share this type and
//! [`CursorResources`] and nothing else.

use std::time::Duration;

use bson::{Bson, Document, Timestamp};
use tracing::debug;

use super::commands::{get_more_command, kill_cursors_command, translate_get_more_error};
use super::policy::LimitPolicy;
use super::reply::{BatchField, CursorReply};
use super::server_cursor::{Namespace, ServerCursor};
use super::{CursorOptions, CursorState};
use crate::connection::{Lease, ReferenceCounted, ServerAddress};
use crate::error::{CursorError, Result};
use crate::timeout::{DeadlineContext, TimeoutMode};

pub(crate) const MESSAGE_IF_CLOSED_AS_CURSOR: &str = "Cursor has been closed";
pub(crate) const MESSAGE_IF_CLOSED_AS_ITERATOR: &str = "Iterator has been closed";

/// A command the adapter must send on the cursor's connection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCommand {
    pub database: String,
    pub command: Document,
}

pub(crate) struct CursorCore {
    namespace: Namespace,
    address: ServerAddress,
    server_cursor: Option<ServerCursor>,
    next_batch: Option<Vec<Document>>,
    policy: LimitPolicy,
    options: CursorOptions,
    state: CursorState,
    first_batch_empty: bool,
    post_batch_resume_token: Option<Document>,
    operation_time: Option<Timestamp>,
    skip_kill_cursors: bool,
    get_more_in_flight: bool,
}

impl CursorCore {
    pub fn from_first_reply(
        reply: &Document,
        address: ServerAddress,
        options: CursorOptions,
    ) -> Result<Self> {
        options.validate()?;
        let first = CursorReply::parse(reply, BatchField::First)?;

        let mut core = Self {
            namespace: first.namespace.clone(),
            address,
            server_cursor: None,
            next_batch: None,
            policy: LimitPolicy::new(options.limit, options.batch_size),
            options,
            state: CursorState::Active,
            first_batch_empty: first.batch.is_empty(),
            post_batch_resume_token: None,
            operation_time: None,
            skip_kill_cursors: false,
            get_more_in_flight: false,
        };
        core.apply_reply(first);
        Ok(core)
    }

    fn apply_reply(&mut self, reply: CursorReply) {
        let CursorReply {
            cursor_id,
            mut batch,
            post_batch_resume_token,
            operation_time,
            ..
        } = reply;

        self.policy.admit(&mut batch);
        debug!(
            "Received batch of {} documents with cursor id {} from server {}",
            batch.len(),
            cursor_id,
            self.address
        );

        self.next_batch = (!batch.is_empty()).then_some(batch);
        self.server_cursor = ServerCursor::from_id(cursor_id, self.address.clone());
        self.post_batch_resume_token = post_batch_resume_token;
        if operation_time.is_some() {
            self.operation_time = operation_time;
        }

        if self.server_cursor.is_none() || self.policy.stop_after_batch() {
            self.state = CursorState::Exhausted;
        }
    }

    /// Fail with [`CursorError::Closed`] once the cursor reached its terminal state.
    pub fn check_open(&self, message: &'static str) -> Result<()> {
        if self.state == CursorState::Closed {
            Err(CursorError::Closed(message))
        } else {
            Ok(())
        }
    }

    /// Called at the start of every iteration call.
    pub fn begin_iteration(&self, deadline: &DeadlineContext) {
        if self.options.timeout_mode == TimeoutMode::Iteration {
            deadline.reset();
        }
    }

    pub fn has_buffered(&self) -> bool {
        self.next_batch.is_some()
    }

    pub fn take_batch(&mut self) -> Option<Vec<Document>> {
        self.next_batch.take()
    }

    pub fn can_get_more(&self) -> bool {
        self.state == CursorState::Active && self.server_cursor.is_some()
    }

    /// Build the next get-more. The deadline is checked here, before anything is sent.
    pub fn begin_get_more(&mut self, deadline: &DeadlineContext) -> Result<PendingCommand> {
        let cursor = self
            .server_cursor
            .as_ref()
            .ok_or(CursorError::Closed(MESSAGE_IF_CLOSED_AS_CURSOR))?;
        let max_time = self.get_more_max_time(deadline)?;
        let command = get_more_command(
            cursor.id(),
            &self.namespace,
            self.policy.effective_batch_size(),
            max_time,
            self.options.comment.as_ref(),
        );
        self.get_more_in_flight = true;
        Ok(PendingCommand {
            database: self.namespace.database().to_string(),
            command,
        })
    }

    /// Apply the outcome of a get-more.
    ///
    /// A cancelled wait leaves the cursor `Active` with nothing buffered. Any
    /// other failure moves the cursor to `Closed`; the adapter must then
    /// release its resources. Cursor-not-found and network failures suppress
    /// the kill-cursors step.
    pub fn complete_get_more(&mut self, result: Result<Document>) -> Result<()> {
        self.get_more_in_flight = false;
        let outcome = result.and_then(|reply| CursorReply::parse(&reply, BatchField::Next));

        match outcome {
            Ok(reply) => {
                self.apply_reply(reply);
                Ok(())
            }
            Err(error) if error.is_cancellation() => {
                debug!("getMore on {} cancelled by the caller", self.namespace);
                Err(error)
            }
            Err(error) => {
                let error = match &self.server_cursor {
                    Some(cursor) => translate_get_more_error(error, cursor),
                    None => error,
                };
                if matches!(error, CursorError::CursorNotFound { .. }) {
                    self.server_cursor = None;
                }
                if error.is_network_error() {
                    self.skip_kill_cursors = true;
                }
                debug!(
                    "getMore on {} failed, closing cursor: {}",
                    self.namespace, error
                );
                self.next_batch = None;
                self.state = CursorState::Closed;
                Err(error)
            }
        }
    }

    /// Take the server cursor and return the kill-cursors command to send, if any.
    ///
    /// A get-more that was started but never completed leaves the connection in
    /// an unknown state, so it is treated like a network failure.
    pub fn take_kill_cursors(&mut self) -> Option<PendingCommand> {
        let cursor = self.server_cursor.take()?;
        if self.skip_kill_cursors || self.get_more_in_flight {
            debug!(
                "Skipping killCursors for cursor {} on {}: connection presumed unusable",
                cursor.id(),
                cursor.address()
            );
            return None;
        }
        Some(PendingCommand {
            database: self.namespace.database().to_string(),
            command: kill_cursors_command(&self.namespace, &cursor),
        })
    }

    pub fn mark_closed(&mut self) {
        self.state = CursorState::Closed;
        self.next_batch = None;
        self.server_cursor = None;
        self.get_more_in_flight = false;
    }

    fn get_more_max_time(&self, deadline: &DeadlineContext) -> Result<Option<Duration>> {
        let remaining = deadline.remaining()?;
        if !(self.options.tailable && self.options.await_data) {
            return Ok(None);
        }
        Ok(match (self.options.max_await_time, remaining) {
            (Some(await_time), Some(remaining)) => Some(await_time.min(remaining)),
            (Some(await_time), None) => Some(await_time),
            (None, remaining) => remaining,
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn server_cursor(&self) -> Option<&ServerCursor> {
        self.server_cursor.as_ref()
    }

    pub fn available(&self) -> usize {
        match (&self.state, &self.next_batch) {
            (CursorState::Closed, _) | (_, None) => 0,
            (_, Some(batch)) => batch.len(),
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut LimitPolicy {
        &mut self.policy
    }

    pub fn comment(&self) -> Option<&Bson> {
        self.options.comment.as_ref()
    }

    pub fn first_batch_empty(&self) -> bool {
        self.first_batch_empty
    }

    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }
}

/// The connection and connection-source aliases a cursor holds while it has a
/// server cursor. Released connection first, then source.
///
/// Dropping without [`release`](Self::release) still gives both aliases back,
/// which covers a cleanup task that is cancelled by runtime shutdown.
pub(crate) struct CursorResources<C: ReferenceCounted, S: ReferenceCounted> {
    leases: Option<(Lease<C>, Lease<S>)>,
}

impl<C: ReferenceCounted, S: ReferenceCounted> CursorResources<C, S> {
    pub fn acquire(connection: &C, source: &S) -> Self {
        Self {
            leases: Some((
                Lease::acquire(connection, "connection"),
                Lease::acquire(source, "connection source"),
            )),
        }
    }

    pub fn connection(&self) -> Option<&C> {
        self.leases.as_ref().map(|(connection, _)| &**connection)
    }

    pub fn release(mut self) {
        self.release_leases();
    }

    fn release_leases(&mut self) {
        if let Some((connection, source)) = self.leases.take() {
            connection.release();
            source.release();
        }
    }
}

impl<C: ReferenceCounted, S: ReferenceCounted> Drop for CursorResources<C, S> {
    fn drop(&mut self) {
        if self.leases.is_some() {
            debug!("Releasing cursor resources on drop");
            self.release_leases();
        }
    }
}
