//! Decoding of cursor-bearing command replies.
//!
//! Every reply the cursor consumes (find, aggregate, getMore) carries a
//! `cursor` sub-document with `id`, `ns` and one of `firstBatch`/`nextBatch`.

use bson::{Bson, Document, Timestamp};

use super::server_cursor::Namespace;
use crate::error::{CursorError, Result};

/// Which batch field a reply is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchField {
    First,
    Next,
}

impl BatchField {
    fn name(self) -> &'static str {
        match self {
            BatchField::First => "firstBatch",
            BatchField::Next => "nextBatch",
        }
    }
}

/// Decoded contents of one cursor reply.
#[derive(Debug, Clone)]
pub(crate) struct CursorReply {
    pub namespace: Namespace,
    pub cursor_id: i64,
    pub batch: Vec<Document>,
    pub post_batch_resume_token: Option<Document>,
    pub operation_time: Option<Timestamp>,
}

impl CursorReply {
    pub fn parse(reply: &Document, field: BatchField) -> Result<Self> {
        let cursor = reply.get_document("cursor")?;

        let cursor_id = match cursor.get("id") {
            Some(Bson::Int64(id)) => *id,
            Some(Bson::Int32(id)) => i64::from(*id),
            Some(other) => {
                return Err(CursorError::InvalidReply(format!(
                    "Unexpected type for cursor id: {other:?}"
                )));
            }
            None => return Err(CursorError::InvalidReply("Missing cursor id".to_string())),
        };

        let namespace = Namespace::parse(cursor.get_str("ns")?)?;

        let batch = cursor
            .get_array(field.name())?
            .iter()
            .map(|value| match value {
                Bson::Document(doc) => Ok(doc.clone()),
                other => Err(CursorError::InvalidReply(format!(
                    "Batch element is not a document: {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let post_batch_resume_token = cursor.get_document("postBatchResumeToken").ok().cloned();
        let operation_time = reply.get_timestamp("operationTime").ok();

        Ok(Self {
            namespace,
            cursor_id,
            batch,
            post_batch_resume_token,
            operation_time,
        })
    }
}
