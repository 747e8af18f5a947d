//! Limit and batch-size policy shared by both cursor flavours.
//!
//! A negative `limit` or `batch_size` asks for a single batch capped at the
//! absolute value. When both are negative the limit's magnitude wins.

use bson::Document;

/// Limit / batch-size bookkeeping for one cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    limit: i32,
    batch_size: i32,
    fetched: i32,
}

impl LimitPolicy {
    pub fn new(limit: i32, batch_size: i32) -> Self {
        Self {
            limit,
            batch_size,
            fetched: 0,
        }
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size
    }

    /// Takes effect from the next request onwards.
    pub fn set_batch_size(&mut self, batch_size: i32) {
        self.batch_size = batch_size;
    }

    /// Documents handed out so far.
    pub fn fetched(&self) -> i32 {
        self.fetched
    }

    /// True when no get-more may follow the first batch.
    pub fn single_batch(&self) -> bool {
        self.limit < 0 || self.batch_size < 0
    }

    /// Maximum number of documents this cursor may ever return.
    pub fn cap(&self) -> Option<i32> {
        let limit = magnitude(self.limit);
        let batch_size = magnitude(self.batch_size);

        if self.limit < 0 {
            Some(limit)
        } else if self.batch_size < 0 {
            Some(if limit == 0 {
                batch_size
            } else {
                limit.min(batch_size)
            })
        } else if limit != 0 {
            Some(limit)
        } else {
            None
        }
    }

    /// Documents still allowed, `None` when unbounded.
    pub fn remaining(&self) -> Option<i32> {
        self.cap().map(|cap| (cap - self.fetched).max(0))
    }

    /// Batch size to request on the initial command or the next get-more.
    ///
    /// Zero lets the server pick its default.
    pub fn effective_batch_size(&self) -> i32 {
        let batch_size = magnitude(self.batch_size);
        match self.remaining() {
            Some(remaining) if self.single_batch() => remaining,
            Some(remaining) if batch_size != 0 => batch_size.min(remaining),
            Some(remaining) => remaining,
            None => batch_size,
        }
    }

    /// True once the cap has been reached.
    pub fn limit_reached(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// True when the cursor must stop after the batch just recorded.
    pub fn stop_after_batch(&self) -> bool {
        self.single_batch() || self.limit_reached()
    }

    /// Drop documents beyond the cap and count the rest as fetched.
    pub(crate) fn admit(&mut self, batch: &mut Vec<Document>) {
        if let Some(remaining) = self.remaining() {
            batch.truncate(usize::try_from(remaining).unwrap_or(0));
        }
        let admitted = i32::try_from(batch.len()).unwrap_or(i32::MAX);
        self.fetched = self.fetched.saturating_add(admitted);
    }
}

fn magnitude(value: i32) -> i32 {
    value.checked_abs().unwrap_or(i32::MAX)
}
