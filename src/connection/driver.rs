//! mongodb-driver backed collaborators
//!
//! [`DriverConnectionSource`] and [`DriverConnection`] let the cursor core run
//! against a live deployment through [`mongodb::Client::database`] and
//! `run_command`. The driver pools sockets internally, so the reference counts
//! here track the cursor's leases rather than a physical socket; get-mores are
//! routed by the driver's server selection, which for a standalone or a
//! directly connected server is the server that created the cursor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::Document;
use mongodb::Client;
use tracing::debug;

use super::{AsyncConnection, ConnectionSource, ReferenceCounted, ServerAddress};
use crate::error::{CursorError, NetworkError, Result};
use crate::timeout::DeadlineContext;

/// Connection source backed by a driver [`Client`].
#[derive(Clone)]
pub struct DriverConnectionSource {
    client: Client,
    address: ServerAddress,
    refs: Arc<AtomicUsize>,
}

impl DriverConnectionSource {
    /// Create a source for `address` with a reference count of one.
    pub fn new(client: Client, address: ServerAddress) -> Self {
        Self {
            client,
            address,
            refs: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Vend a new connection with its own reference count of one.
    pub fn connection(&self) -> DriverConnection {
        DriverConnection {
            client: self.client.clone(),
            address: self.address.clone(),
            refs: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ReferenceCounted for DriverConnectionSource {
    fn retain(&self) -> Self {
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    fn release(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl ConnectionSource for DriverConnectionSource {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }
}

impl fmt::Debug for DriverConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConnectionSource")
            .field("address", &self.address)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Connection handle that executes commands through a driver [`Client`].
#[derive(Clone)]
pub struct DriverConnection {
    client: Client,
    address: ServerAddress,
    refs: Arc<AtomicUsize>,
}

impl ReferenceCounted for DriverConnection {
    fn retain(&self) -> Self {
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    fn release(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AsyncConnection for DriverConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    async fn command(
        &self,
        database: &str,
        command: Document,
        deadline: &DeadlineContext,
    ) -> Result<Document> {
        let limit = deadline.command_timeout()?;
        let db = self.client.database(database);
        let name = command.keys().next().cloned().unwrap_or_default();
        let run = async move { db.run_command(command).await };

        let reply = match limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!("Command '{}' on {} exceeded {:?}", name, self.address, limit);
                    return Err(CursorError::timeout(format!(
                        "Command '{name}' did not complete within {limit:?}"
                    )));
                }
            },
            None => run.await,
        };

        reply.map_err(|e| match CursorError::from(e) {
            CursorError::Network(NetworkError { message, .. }) => {
                CursorError::Network(NetworkError {
                    address: Some(self.address.clone()),
                    message,
                })
            }
            other => other,
        })
    }
}

impl fmt::Debug for DriverConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConnection")
            .field("address", &self.address)
            .field("refs", &self.ref_count())
            .finish()
    }
}
