//! Per-entity extractors over the relational source.
//!
//! Every extractor answers the same three questions: "what changed past this
//! cursor", "which primary keys are live", and (for parents with children)
//! "what belongs to this row". Batched extractors use keyset pagination on
//! `(modification marker, primary key)`; snapshot extractors return the
//! whole (small) table per pass.
//!
//! Malformed rows are logged with their primary key and skipped; the page
//! cursor still advances past them so one poison row cannot wedge a pass.

pub mod categories;
pub mod customers;
pub mod employees;
pub mod expenses;
pub mod products;
pub mod settings;
pub mod transactions;

pub use categories::CategoryExtractor;
pub use customers::CustomerExtractor;
pub use employees::EmployeeExtractor;
pub use expenses::ExpenseExtractor;
pub use products::ProductExtractor;
pub use settings::BusinessSettingExtractor;
pub use transactions::TransactionExtractor;

use chrono::{DateTime, Utc};
use tillsync_core::{ChangedDoc, ChangedPage, EntityKind, PageCursor};
use tracing::warn;

/// Accumulates one page while tracking the cursor over *fetched* rows, so
/// skipped rows still move the cursor forward.
pub(crate) struct PageBuilder {
    entity: EntityKind,
    docs: Vec<ChangedDoc>,
    fetched: usize,
    skipped: u64,
    last: Option<(DateTime<Utc>, i64)>,
}

impl PageBuilder {
    pub(crate) fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            docs: Vec::new(),
            fetched: 0,
            skipped: 0,
            last: None,
        }
    }

    /// Record that a row with this `(marker, id)` was read from the source,
    /// whether or not it projects cleanly.
    pub(crate) fn fetched(&mut self, marker: DateTime<Utc>, id: i64) {
        self.fetched += 1;
        self.last = Some((marker, id));
    }

    pub(crate) fn push(&mut self, doc: ChangedDoc) {
        self.docs.push(doc);
    }

    /// Drop a malformed row, keeping its key in the operator log.
    pub(crate) fn skip(&mut self, id: i64, reason: &dyn std::fmt::Display) {
        warn!(entity = %self.entity, id, %reason, "skipping malformed source row");
        self.skipped += 1;
    }

    pub(crate) fn finish(self) -> ChangedPage {
        ChangedPage {
            docs: self.docs,
            fetched: self.fetched,
            skipped: self.skipped,
            next: self
                .last
                .map(|(since, after_id)| PageCursor { since, after_id }),
        }
    }
}
