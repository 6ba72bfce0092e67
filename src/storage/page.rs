//! Cursor pagination
//!
//! Keys, values and entries are all read the same way: open a cursor, skip
//! `start` positions with one `advance`, then capture and step until
//! `length` items are collected or the cursor runs out.

use serde::{Deserialize, Serialize};

use crate::engine::Cursor;
use crate::error::{Error, Result};
use crate::model::KeyRange;
use crate::request::{Request, RequestEvent};

/// Which slice of a table to read.
///
/// The default reads every row in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Rows skipped before capture begins
    pub start: u32,
    /// Maximum rows returned; `None` is unbounded
    pub length: Option<u32>,
    /// Restricts the cursor to a key range
    pub range: Option<KeyRange>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, start: u32) -> Self {
        self.start = start;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    fn is_full(&self, collected: usize) -> bool {
        self.length
            .map_or(false, |length| collected >= length as usize)
    }
}

/// Drives `request` to collect one page, mapping each position through
/// `extract`.
pub(crate) async fn collect<T, F>(
    mut request: Request<Option<Cursor>>,
    page: &Page,
    mut extract: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Cursor) -> Result<T>,
{
    let mut items = Vec::new();
    if page.is_full(0) {
        return Ok(items);
    }

    let mut skipped = page.start == 0;
    loop {
        let cursor = match request.next_event().await {
            Some(RequestEvent::Success(cursor)) | Some(RequestEvent::Complete(cursor)) => cursor,
            Some(RequestEvent::Abort(e)) | Some(RequestEvent::Error(e)) => return Err(e),
            Some(RequestEvent::Blocked(_)) => continue,
            None => return Err(Error::RequestDropped(request.label().to_string())),
        };
        let Some(cursor) = cursor else {
            break;
        };

        if !skipped {
            skipped = true;
            cursor.advance(page.start);
            continue;
        }

        items.push(extract(&cursor)?);
        if page.is_full(items.len()) {
            break;
        }
        cursor.step();
    }

    Ok(items)
}
