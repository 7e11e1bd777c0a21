//! Keyset cursor and page types shared by the extractors and the engine.
//!
//! Pages are ordered by `(modification marker, primary key)` ascending and
//! the cursor carries both halves, so a page boundary can never truncate a
//! run of rows that share one marker: the next page resumes strictly after
//! the last acknowledged `(marker, id)` pair.

use bson::Document;
use chrono::{DateTime, Utc};

/// Resumable position inside an entity's change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// Modification marker of the last acknowledged row.
    pub since: DateTime<Utc>,
    /// Primary key of the last acknowledged row at `since`; 0 means
    /// "before any row at this marker" (source keys start at 1).
    pub after_id: i64,
}

impl PageCursor {
    /// Cursor positioned before any row with a marker beyond `since`.
    #[must_use]
    pub fn start(since: DateTime<Utc>) -> Self {
        Self { since, after_id: 0 }
    }
}

/// One projected row, tagged with the marker the checkpoint will advance to
/// once the containing batch is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedDoc {
    pub id: i64,
    pub marker: DateTime<Utc>,
    pub document: Document,
}

/// One page of changed rows.
///
/// `fetched` counts rows read from the source, including rows that were
/// skipped as malformed, so `fetched == batch` is the saturation test and
/// `next` always advances past poison rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangedPage {
    pub docs: Vec<ChangedDoc>,
    pub fetched: usize,
    pub skipped: u64,
    /// Cursor after the last fetched row; `None` when the page was empty.
    pub next: Option<PageCursor>,
}

impl ChangedPage {
    /// Whether the source may have more rows beyond this page.
    #[must_use]
    pub fn saturated(&self, batch: usize) -> bool {
        self.fetched >= batch
    }
}
