//! Builders for the commands a cursor sends, and translation of their failures.

use std::time::Duration;

use bson::{Bson, Document, doc};

use super::server_cursor::{Namespace, ServerCursor};
use crate::error::{CURSOR_NOT_FOUND_CODE, CursorError};
use crate::timeout::duration_to_millis;

/// `{ getMore: <id>, collection: <name>, batchSize: <n>, maxTimeMS: <n>, comment: <c> }`
///
/// `batchSize` is omitted when zero (server default) and `maxTimeMS` when absent.
pub fn get_more_command(
    cursor_id: i64,
    namespace: &Namespace,
    batch_size: i32,
    max_time: Option<Duration>,
    comment: Option<&Bson>,
) -> Document {
    let mut command = doc! {
        "getMore": cursor_id,
        "collection": namespace.collection(),
    };
    if batch_size != 0 {
        command.insert("batchSize", batch_size);
    }
    if let Some(max_time) = max_time {
        command.insert("maxTimeMS", duration_to_millis(max_time));
    }
    if let Some(comment) = comment {
        command.insert("comment", comment.clone());
    }
    command
}

/// `{ killCursors: <collection>, cursors: [<id>] }`
pub fn kill_cursors_command(namespace: &Namespace, cursor: &ServerCursor) -> Document {
    doc! {
        "killCursors": namespace.collection(),
        "cursors": [cursor.id()],
    }
}

/// Promote a "cursor not found" server error to a typed error carrying the
/// stale cursor identity. Other errors pass through unchanged.
pub fn translate_get_more_error(error: CursorError, cursor: &ServerCursor) -> CursorError {
    match error {
        CursorError::Command(ref e) if e.code == CURSOR_NOT_FOUND_CODE => {
            CursorError::CursorNotFound {
                cursor_id: cursor.id(),
                address: cursor.address().clone(),
            }
        }
        other => other,
    }
}
