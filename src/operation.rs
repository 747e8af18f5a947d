//! Operation correlation for cursor commands.
//!
//! Every get-more a cursor issues can carry the `comment` of the operation
//! that created it, so the server-side `$currentOp` and profiler entries of a
//! long tailable iteration can be traced back to the client that owns it.

use bson::Bson;
use uuid::Uuid;

/// A unique comment identifying one cursor-producing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Format: `mongosh-<client_id>-<uuid>`
    pub comment: String,
}

impl OperationHandle {
    /// Create a new operation handle with a unique comment.
    ///
    /// # Arguments
    /// * `client_id` - Identifier for this client instance (e.g., hostname)
    pub fn new(client_id: &str) -> Self {
        Self {
            comment: format!("mongosh-{}-{}", client_id, Uuid::new_v4()),
        }
    }

    /// Get the comment string.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Comment as a BSON value, ready to be attached to a command.
    pub fn to_bson(&self) -> Bson {
        Bson::String(self.comment.clone())
    }
}

/// Identifier used when no client id is configured: the machine hostname.
pub fn default_client_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_handle_format() {
        let handle = OperationHandle::new("test-client");
        assert!(handle.comment.starts_with("mongosh-test-client-"));
        assert!(handle.comment.len() > "mongosh-test-client-".len());
    }

    #[test]
    fn test_operation_handle_uniqueness() {
        let handle1 = OperationHandle::new("test");
        let handle2 = OperationHandle::new("test");
        assert_ne!(handle1.comment, handle2.comment);
    }

    #[test]
    fn test_to_bson() {
        let handle = OperationHandle::new("c");
        assert_eq!(handle.to_bson(), Bson::String(handle.comment().to_string()));
    }

    #[test]
    fn test_default_client_id_is_not_empty() {
        assert!(!default_client_id().is_empty());
    }
}
