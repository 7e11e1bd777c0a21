//! Pluggable seams between the engine and its endpoints.
//!
//! Each seam has a production implementation and a memory implementation:
//! checkpoints in PostgreSQL (memory for tests), the target store in
//! MongoDB (memory for tests and local development), extractors over the
//! source pool (scripted in engine tests).

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tillsync_core::{ChangedDoc, ChangedPage, Checkpoint, EntityKind, PageCursor, SyncLogDoc, SyncResult};

use crate::error::SyncError;

/// Durable per-`(device, entity)` cursor state.
///
/// Implementations: PostgreSQL (the source itself, so checkpoint updates are
/// transactional with source reads), memory (tests).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint for a pair. `Ok(None)` means "never synced";
    /// the engine falls back to its default window. `Err` means the store
    /// is unreachable and the pass must abort before touching the target.
    async fn get(
        &self,
        device_id: &str,
        entity: EntityKind,
    ) -> Result<Option<Checkpoint>, SyncError>;

    /// Create or update a pair's checkpoint atomically. `updated_at` always
    /// bumps; `last_sync_time` never regresses even under a losing
    /// concurrent write; `last_record_id` and `payload` update only when
    /// provided. Durable before return.
    async fn upsert(
        &self,
        device_id: &str,
        entity: EntityKind,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> Result<(), SyncError>;
}

/// Result of one bulk upsert call.
///
/// `modified` counts documents whose content actually changed (a replacement
/// identical to the stored document counts as matched, not modified), which
/// is what makes replay idempotence observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub inserted: u64,
    pub modified: u64,
    pub failed: u64,
}

/// Keyed document sink for one database of target collections.
///
/// Implementations: MongoDB, memory (tests, local development).
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Unordered bulk upsert keyed by `_id`. Per-document failures are
    /// reported in the summary and logged; they do not abort the batch.
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: Vec<ChangedDoc>,
    ) -> Result<BatchSummary, SyncError>;

    /// One bulk delete keyed by `_id`. Returns the number removed.
    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> Result<u64, SyncError>;

    /// `_id`-only projection of a whole collection, for deletion
    /// reconciliation.
    async fn present_ids(&self, collection: &str) -> Result<HashSet<i64>, SyncError>;

    /// Append a pass outcome to `sync_logs`. Inserted, never upserted.
    async fn insert_sync_log(&self, entry: &SyncLogDoc) -> Result<(), SyncError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), SyncError>;
}

/// Change-stream view of one source entity.
///
/// One implementation per entity; all share the source pool. The engine
/// drives `changed_page` with a keyset cursor and detects "more available"
/// by page saturation.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    fn entity(&self) -> EntityKind;

    /// Rows changed since the cursor, ordered `(marker, primary key)`
    /// ascending, at most `batch` rows fetched. Not restartable within a
    /// pass; the caller owns cursor advancement.
    async fn changed_page(
        &self,
        cursor: PageCursor,
        batch: usize,
    ) -> Result<ChangedPage, SyncError>;

    /// Primary keys currently live (non-deleted) in the source. Invoked
    /// once per pass, not per batch.
    async fn live_ids(&self) -> Result<HashSet<i64>, SyncError>;

    /// Soft-deleted rows observed since the watermark, with the marker each
    /// tombstone was written at so the checkpoint can advance past a
    /// delete-only pass. Only entities with an explicit tombstone flag
    /// override this.
    async fn soft_deleted(&self, since: DateTime<Utc>) -> Result<Vec<Tombstone>, SyncError> {
        let _ = since;
        Ok(Vec::new())
    }
}

/// A soft-deleted source row: its key and the marker of the deleting write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub id: i64,
    pub marker: DateTime<Utc>,
}

/// Time-windowed full-history source for the bulk backfill.
///
/// Implemented by the transaction extractor; faked in backfill tests.
#[async_trait]
pub trait BulkSource: Send + Sync {
    /// `(min, max, total)` over the live history, or `None` when the
    /// history is empty.
    async fn history_span(&self) -> Result<Option<HistorySpan>, SyncError>;

    /// Rows whose business timestamp falls in `[window_start, window_end)`,
    /// resuming after `cursor` within the window.
    async fn window_page(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        cursor: PageCursor,
        batch: usize,
    ) -> Result<ChangedPage, SyncError>;
}

/// Bounds of the transaction history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySpan {
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
    pub total_count: i64,
}

/// What the scheduler drives on each tick. Implemented by the engine;
/// faked in scheduler tests.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Run one pass of every registered entity, sequentially. Never
    /// returns an error: per-entity failures are captured in the results.
    async fn run_cycle(&self) -> Vec<SyncResult>;

    /// One-time reachability probe of both endpoints, published to the
    /// status snapshot. Independent of the auto-sync toggle.
    async fn probe(&self);
}
