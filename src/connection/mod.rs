//! Connection collaborators consumed by the cursor core
//!
//! The cursor does not own a pool. It is handed the connection that produced
//! its first batch and the source that vended that connection, retains one
//! alias of each for its whole lifetime and releases both exactly once. This
//! module defines:
//! - The [`ReferenceCounted`] contract and the [`Lease`] owning handle
//! - Blocking ([`Connection`]) and async ([`AsyncConnection`]) command execution
//! - [`ConnectionSource`], the vendor of a connection
//! - mongodb-driver backed implementations in [`driver`]

use async_trait::async_trait;
use bson::Document;

pub use mongodb::options::ServerAddress;

use crate::cursor::Interrupt;
use crate::error::Result;
use crate::timeout::DeadlineContext;

pub mod driver;
pub mod lease;

pub use driver::{DriverConnection, DriverConnectionSource};
pub use lease::{Lease, ReferenceCounted};

/// A pooled connection that executes commands by blocking the caller.
pub trait Connection: ReferenceCounted + Send {
    /// Address of the server this connection talks to.
    fn address(&self) -> &ServerAddress;

    /// Run `command` against `database` and return the decoded reply.
    ///
    /// Implementations bound the round trip by `deadline.command_timeout()`
    /// and report transport failures as [`CursorError::Network`](crate::error::CursorError::Network).
    ///
    /// A wait for the reply must give up once `interrupt.should_stop()` turns
    /// true and return [`CursorError::Cancelled`](crate::error::CursorError::Cancelled).
    /// If the connection cannot be reused after abandoning the reply, the
    /// next command on it must fail with a network error.
    fn command(
        &self,
        database: &str,
        command: Document,
        deadline: &DeadlineContext,
        interrupt: &Interrupt,
    ) -> Result<Document>;
}

/// A pooled connection that executes commands asynchronously.
#[async_trait]
pub trait AsyncConnection: ReferenceCounted + Send + Sync + 'static {
    /// Address of the server this connection talks to.
    fn address(&self) -> &ServerAddress;

    /// Run `command` against `database` and return the decoded reply.
    async fn command(
        &self,
        database: &str,
        command: Document,
        deadline: &DeadlineContext,
    ) -> Result<Document>;
}

/// The source that vended a cursor's connection.
pub trait ConnectionSource: ReferenceCounted + Send + Sync + 'static {
    /// Address of the selected server.
    fn server_address(&self) -> &ServerAddress;
}
