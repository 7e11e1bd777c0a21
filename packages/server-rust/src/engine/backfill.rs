//! Bulk historical backfill for the transaction stream.
//!
//! Walks the full history in week-sized `TransactionDate` windows, streaming
//! each window through the loader in bulk batches and checkpointing after
//! every window so an interrupted run resumes at the last processed day.
//! Completion is recorded with the `COMPLETED` payload sentinel, which lets
//! the incremental pass narrow its window (see `pass.rs`).
//!
//! The watermark written for a window is clamped to the instant the backfill
//! started: windows near the end of history would otherwise push
//! `LastSyncTime` past modifications made while the backfill was running.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tillsync_core::{Checkpoint, EntityKind, PageCursor, BULK_COMPLETED, PROCESSED_DATE_PREFIX};
use tracing::{info, warn};

use super::SyncEngine;
use crate::error::SyncError;
use crate::traits::BulkSource;

/// Width of one backfill window.
pub const BACKFILL_WINDOW_DAYS: i64 = 7;

/// Outcome of one backfill invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    pub windows: u32,
    pub records: u64,
    /// False when the run was interrupted by shutdown; the next invocation
    /// resumes from the recorded day.
    pub completed: bool,
}

impl SyncEngine {
    /// Run the transaction history backfill to completion (or shutdown).
    ///
    /// Idempotent: a completed backfill returns immediately; an interrupted
    /// one resumes from its `ProcessedDate` payload.
    ///
    /// # Errors
    /// Source, target, or checkpoint failures; the checkpoint keeps the last
    /// fully processed window, so a retry resumes rather than restarts.
    pub async fn run_transaction_backfill(&self) -> Result<BackfillSummary, SyncError> {
        let Some(bulk) = self.bulk.clone() else {
            return Err(SyncError::Config(
                "no bulk source registered for the transaction backfill".to_string(),
            ));
        };

        let existing = self
            .checkpoints
            .get(&self.device_id, EntityKind::Transaction)
            .await?;
        if existing.as_ref().is_some_and(Checkpoint::bulk_completed) {
            info!("transaction backfill already completed; nothing to do");
            return Ok(BackfillSummary {
                windows: 0,
                records: 0,
                completed: true,
            });
        }

        self.status.update(|status| {
            status.is_bulk_syncing = true;
            status.bulk_sync_progress = "probing transaction history".to_string();
        });
        self.logs.push("bulk backfill started".to_string());

        let outcome = self.backfill_inner(bulk.as_ref(), existing).await;

        self.status.update(|status| {
            status.is_bulk_syncing = false;
            status.bulk_sync_progress = match &outcome {
                Ok(summary) if summary.completed => {
                    format!("completed: {} records in {} windows", summary.records, summary.windows)
                }
                Ok(summary) => format!(
                    "interrupted after {} windows ({} records)",
                    summary.windows, summary.records
                ),
                Err(error) => format!("failed: {error}"),
            };
        });
        match &outcome {
            Ok(summary) if summary.completed => self.logs.push(format!(
                "SUCCESS: bulk backfill completed ({} records)",
                summary.records
            )),
            Ok(_) => self
                .logs
                .push("WARNING: bulk backfill interrupted; will resume".to_string()),
            Err(error) => self.logs.push(format!("ERROR: bulk backfill failed: {error}")),
        }
        outcome
    }

    async fn backfill_inner(
        &self,
        bulk: &dyn BulkSource,
        existing: Option<Checkpoint>,
    ) -> Result<BackfillSummary, SyncError> {
        let entity = EntityKind::Transaction;
        let collection = entity.collection();
        let started_at = Utc::now();

        let Some(span) = bulk.history_span().await? else {
            // Empty history is still covered history.
            self.checkpoints
                .upsert(&self.device_id, entity, started_at, None, Some(BULK_COMPLETED))
                .await?;
            return Ok(BackfillSummary {
                windows: 0,
                records: 0,
                completed: true,
            });
        };

        let resume = existing
            .as_ref()
            .and_then(Checkpoint::processed_date)
            .map(|day| day.and_time(NaiveTime::MIN).and_utc());
        let mut window_start = match resume {
            // Re-walk the last recorded day's window; upserts are idempotent.
            Some(day) => day.max(span.min_date),
            None => span.min_date,
        };

        let batch = self.config.transaction_batch_size;
        let mut windows = 0u32;
        let mut records = 0u64;

        while window_start <= span.max_date {
            if self.shutdown_requested() {
                return Ok(BackfillSummary {
                    windows,
                    records,
                    completed: false,
                });
            }

            let window_end = window_start + Duration::days(BACKFILL_WINDOW_DAYS);
            let mut cursor = PageCursor::start(window_start);

            loop {
                let page = self
                    .bounded_source(
                        entity,
                        bulk.window_page(window_start, window_end, cursor, batch),
                    )
                    .await?;

                if page.skipped > 0 {
                    warn!(skipped = page.skipped, "malformed rows skipped during backfill");
                }
                let is_saturated = page.saturated(batch);
                if let Some(next) = page.next {
                    if !page.docs.is_empty() {
                        let attempted = u64::try_from(page.docs.len()).unwrap_or(u64::MAX);
                        let summary = self.target.upsert_batch(collection, page.docs).await?;
                        records += attempted.saturating_sub(summary.failed);
                    }
                    cursor = next;
                }
                if !is_saturated {
                    break;
                }
                tokio::time::sleep(self.config.inter_batch_delay()).await;
            }

            let watermark = clamp_watermark(window_end, started_at);
            let payload = format!("{PROCESSED_DATE_PREFIX}{}", window_end.date_naive());
            self.checkpoints
                .upsert(&self.device_id, entity, watermark, None, Some(&payload))
                .await?;

            windows += 1;
            self.status.update(|status| {
                status.bulk_sync_progress = format!(
                    "{records}/{} transactions, processed through {}",
                    span.total_count,
                    window_end.date_naive()
                );
            });

            window_start = window_end;
            tokio::time::sleep(self.config.inter_batch_delay()).await;
        }

        let final_watermark = clamp_watermark(window_start, started_at);
        self.checkpoints
            .upsert(&self.device_id, entity, final_watermark, None, Some(BULK_COMPLETED))
            .await?;

        Ok(BackfillSummary {
            windows,
            records,
            completed: true,
        })
    }
}

fn clamp_watermark(window_end: DateTime<Utc>, started_at: DateTime<Utc>) -> DateTime<Utc> {
    window_end.min(started_at)
}
