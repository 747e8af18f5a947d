//! Server cursor identity and namespaces.

use std::fmt;

use crate::connection::ServerAddress;
use crate::error::{CursorError, Result};

/// A live cursor resource held by a server.
///
/// Id `0` is the "no more batches" sentinel and never yields a `ServerCursor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCursor {
    id: i64,
    address: ServerAddress,
}

impl ServerCursor {
    /// Build a handle, or `None` for the exhausted sentinel.
    pub fn from_id(id: i64, address: ServerAddress) -> Option<Self> {
        (id != 0).then_some(Self { id, address })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }
}

impl fmt::Display for ServerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// `database.collection` pair a cursor iterates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parse the `ns` field of a cursor reply. The collection part may itself contain dots.
    pub fn parse(ns: &str) -> Result<Self> {
        match ns.split_once('.') {
            Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
                Ok(Self::new(database, collection))
            }
            _ => Err(CursorError::InvalidReply(format!(
                "Invalid namespace '{ns}'"
            ))),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
