//! Async batch cursor.
//!
//! One [`AsyncBatchCursor`] may be cloned and shared between tasks. All
//! operations go through a single async mutex, so at most one get-more or
//! kill-cursors is outstanding at any time and batches are delivered in the
//! order the server produced them. `close()` cancels a shared token before
//! taking the mutex: an in-flight `next` finishes its current get-more, sees
//! the token and returns, and only then are the leases released.

use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document, Timestamp};
use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::core::{
    CursorCore, CursorResources, MESSAGE_IF_CLOSED_AS_CURSOR, MESSAGE_IF_CLOSED_AS_ITERATOR,
    PendingCommand,
};
use super::server_cursor::{Namespace, ServerCursor};
use super::{CursorOptions, CursorState};
use crate::connection::{AsyncConnection, ConnectionSource, ServerAddress};
use crate::error::{CursorError, ErrorInfo, Result};
use crate::timeout::DeadlineContext;

/// Cloneable handle to an async server-side cursor.
///
/// Dropping the last handle closes the cursor: on a tokio runtime the
/// kill-cursors is spawned onto it, otherwise the leases are released without
/// contacting the server.
pub struct AsyncBatchCursor<C: AsyncConnection, S: ConnectionSource> {
    shared: Arc<Shared<C, S>>,
}

struct Shared<C: AsyncConnection, S: ConnectionSource> {
    inner: Mutex<Inner<C, S>>,
    cancel: CancellationToken,
    deadline: Arc<DeadlineContext>,
    kill_cursors_timeout: Duration,
    namespace: Namespace,
}

struct Inner<C: AsyncConnection, S: ConnectionSource> {
    core: CursorCore,
    resources: Option<CursorResources<C, S>>,
}

impl<C: AsyncConnection, S: ConnectionSource> Clone for AsyncBatchCursor<C, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: AsyncConnection, S: ConnectionSource> AsyncBatchCursor<C, S> {
    /// Build a cursor from the reply to the initial find/aggregate.
    ///
    /// When the first reply already satisfies the limit the server cursor is
    /// killed here and both leases are released before returning.
    pub async fn new(
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

        let shared = Shared {
            namespace: core.namespace().clone(),
            inner: Mutex::new(Inner { core, resources }),
            cancel: CancellationToken::new(),
            deadline,
            kill_cursors_timeout,
        };

        {
            let mut inner = shared.inner.lock().await;
            if inner.core.state() == CursorState::Exhausted {
                shared.release_resources(&mut inner).await;
            }
        }

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Next non-empty batch, issuing get-mores as needed.
    ///
    /// Fails with [`CursorError::NoMoreElements`] once the cursor is exhausted
    /// and with [`CursorError::Cancelled`] when `close()` was requested while
    /// this call was waiting.
    pub async fn next(&self) -> Result<Vec<Document>> {
        let mut inner = self.lock().await;
        inner.core.check_open(MESSAGE_IF_CLOSED_AS_ITERATOR)?;
        inner.core.begin_iteration(&self.shared.deadline);
        if !self.shared.fill_buffer(&mut inner).await? {
            return Err(CursorError::NoMoreElements);
        }
        inner.core.take_batch().ok_or(CursorError::NoMoreElements)
    }

    pub async fn has_next(&self) -> Result<bool> {
        let mut inner = self.lock().await;
        inner.core.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        inner.core.begin_iteration(&self.shared.deadline);
        self.shared.fill_buffer(&mut inner).await
    }

    /// Buffered batch, or the result of at most one get-more.
    pub async fn try_next(&self) -> Result<Option<Vec<Document>>> {
        let mut inner = self.lock().await;
        inner.core.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        inner.core.begin_iteration(&self.shared.deadline);
        if !inner.core.has_buffered() && inner.core.can_get_more() {
            self.shared.check_cancelled()?;
            self.shared.get_more(&mut inner).await?;
        }
        Ok(inner.core.take_batch())
    }

    /// Run [`next`](Self::next) on a spawned task and hand the outcome to
    /// `callback`, which is invoked exactly once.
    pub fn next_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<Document>>) + Send + 'static,
    {
        let cursor = self.clone();
        tokio::spawn(async move {
            let result = cursor.next().await;
            callback(result);
        })
    }

    /// Stream of batches. Ends after the last batch or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Document>>> + Send + 'static {
        futures::stream::unfold(Some(self), |cursor| async move {
            let cursor = cursor?;
            match cursor.next().await {
                Ok(batch) => Some((Ok(batch), Some(cursor))),
                Err(CursorError::NoMoreElements) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Close the cursor, waiting for an in-flight call to settle first.
    /// Calling it again has no effect.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let mut inner = self.lock().await;
        if inner.core.state() == CursorState::Closed && inner.resources.is_none() {
            return;
        }
        self.shared.release_resources(&mut inner).await;
        inner.core.mark_closed();
        info!("Closed cursor on {}", self.shared.namespace);
    }

    /// True once `close()` has been requested on any handle.
    pub fn is_close_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    pub async fn available(&self) -> usize {
        self.lock().await.core.available()
    }

    pub async fn state(&self) -> CursorState {
        self.lock().await.core.state()
    }

    /// Live server cursor, `None` once exhausted or closed.
    pub async fn server_cursor(&self) -> Option<ServerCursor> {
        self.lock().await.core.server_cursor().cloned()
    }

    pub async fn server_address(&self) -> Result<ServerAddress> {
        let inner = self.lock().await;
        inner.core.check_open(MESSAGE_IF_CLOSED_AS_CURSOR)?;
        Ok(inner.core.address().clone())
    }

    pub async fn batch_size(&self) -> i32 {
        self.lock().await.core.policy().batch_size()
    }

    /// Applies to subsequent get-mores only.
    pub async fn set_batch_size(&self, batch_size: i32) {
        self.lock().await.core.policy_mut().set_batch_size(batch_size);
    }

    pub async fn comment(&self) -> Option<Bson> {
        self.lock().await.core.comment().cloned()
    }

    pub async fn is_first_batch_empty(&self) -> bool {
        self.lock().await.core.first_batch_empty()
    }

    pub async fn post_batch_resume_token(&self) -> Option<Document> {
        self.lock().await.core.post_batch_resume_token().cloned()
    }

    pub async fn operation_time(&self) -> Option<Timestamp> {
        self.lock().await.core.operation_time()
    }

    async fn lock(&self) -> MutexGuard<'_, Inner<C, S>> {
        self.shared.inner.lock().await
    }
}

impl<C: AsyncConnection, S: ConnectionSource> Shared<C, S> {
    async fn fill_buffer(&self, inner: &mut Inner<C, S>) -> Result<bool> {
        loop {
            if inner.core.has_buffered() {
                return Ok(true);
            }
            if !inner.core.can_get_more() {
                return Ok(false);
            }
            self.check_cancelled()?;
            self.get_more(inner).await?;
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CursorError::Cancelled(
                "Cursor close requested while waiting for the next batch".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn get_more(&self, inner: &mut Inner<C, S>) -> Result<()> {
        let deadline = &*self.deadline;
        let pending = inner.core.begin_get_more(deadline);
        let connection = inner.resources.as_ref().and_then(CursorResources::connection);
        let result = match (pending, connection) {
            (Ok(pending), Some(connection)) => {
                connection
                    .command(&pending.database, pending.command, deadline)
                    .await
            }
            (Ok(_), None) => Err(CursorError::Closed(MESSAGE_IF_CLOSED_AS_CURSOR)),
            (Err(e), _) => Err(e),
        };

        let outcome = inner.core.complete_get_more(result);
        if inner.core.state() != CursorState::Active {
            self.release_resources(inner).await;
        }
        outcome
    }

    async fn release_resources(&self, inner: &mut Inner<C, S>) {
        let kill = inner.core.take_kill_cursors();
        if let Some(resources) = inner.resources.take() {
            kill_and_release(
                kill,
                resources,
                &self.deadline,
                self.kill_cursors_timeout,
                &self.namespace,
            )
            .await;
        }
    }
}

impl<C: AsyncConnection, S: ConnectionSource> Drop for Shared<C, S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.core.state() == CursorState::Closed && inner.resources.is_none() {
            return;
        }
        debug!("AsyncBatchCursor dropped without explicit close");

        let kill = inner.core.take_kill_cursors();
        let resources = inner.resources.take();
        inner.core.mark_closed();
        let Some(resources) = resources else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                let deadline = Arc::clone(&self.deadline);
                let timeout = self.kill_cursors_timeout;
                let namespace = self.namespace.clone();
                handle.spawn(async move {
                    kill_and_release(kill, resources, &deadline, timeout, &namespace).await;
                });
            }
            Err(_) => {
                debug!(
                    "No runtime available to kill cursor on {}, releasing resources only",
                    self.namespace
                );
                resources.release();
            }
        }
    }
}

/// Send the kill-cursors, if any, under the scoped max time and release the
/// leases whatever its outcome.
async fn kill_and_release<C: AsyncConnection, S: ConnectionSource>(
    kill: Option<PendingCommand>,
    resources: CursorResources<C, S>,
    deadline: &DeadlineContext,
    kill_cursors_timeout: Duration,
    namespace: &Namespace,
) {
    if let (Some(pending), Some(connection)) = (kill, resources.connection()) {
        let result = deadline
            .run_with_max_time_async(
                kill_cursors_timeout,
                connection.command(&pending.database, pending.command, deadline),
            )
            .await;
        match result {
            Ok(_) => debug!("Killed cursor on {}", namespace),
            Err(e) => debug!(
                error = %ErrorInfo::from_cursor_error(&e).summary(),
                "killCursors on {} failed",
                namespace
            ),
        }
    }
    resources.release();
}
