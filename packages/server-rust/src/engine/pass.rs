//! One incremental pass of one entity.
//!
//! Order of operations inside a pass:
//! 1. read the checkpoint (absent -> default window, floored at the replay
//!    horizon),
//! 2. reconcile deletions (set difference plus soft-delete sweep) BEFORE any
//!    insert, so a deleted-and-recreated id ends up present,
//! 3. page through changed rows, upserting each page and advancing the
//!    checkpoint only after the page is acknowledged,
//! 4. advance past swept tombstones, then touch the checkpoint if nothing
//!    else moved it.
//!
//! A failed batch leaves the checkpoint untouched; the next pass replays the
//! same window against idempotent upserts.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tillsync_core::{Checkpoint, EntityKind, PageCursor, SyncResult};
use tracing::{debug, warn};

use super::SyncEngine;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

#[derive(Debug, Default)]
struct PassTally {
    synced: u64,
    deleted: u64,
    skipped: u64,
    watermark: Option<DateTime<Utc>>,
}

impl SyncEngine {
    /// Run one pass and capture its outcome; failures land in the result,
    /// never in a panic or a lost checkpoint.
    pub async fn run_entity_pass(&self, extractor: &dyn EntityExtractor) -> SyncResult {
        let entity = extractor.entity();
        let started = Instant::now();
        let mut tally = PassTally::default();

        let (success, error) = match self.execute_pass(extractor, &mut tally).await {
            Ok(()) => (true, None),
            Err(error) => {
                warn!(entity = %entity, %error, "entity pass failed");
                (false, Some(error.to_string()))
            }
        };

        let result = SyncResult {
            device_id: self.device_id.clone(),
            entity,
            records_synced: tally.synced,
            records_deleted: tally.deleted,
            records_skipped: tally.skipped,
            last_sync_time: tally.watermark.unwrap_or_else(Utc::now),
            elapsed: started.elapsed(),
            success,
            error,
        };

        self.logs.push(result.ring_line());
        if let Err(log_error) = self.target.insert_sync_log(&result.to_log_doc()).await {
            warn!(entity = %entity, %log_error, "could not record sync log entry");
        }
        result
    }

    async fn execute_pass(
        &self,
        extractor: &dyn EntityExtractor,
        tally: &mut PassTally,
    ) -> Result<(), SyncError> {
        let entity = extractor.entity();
        let collection = entity.collection();

        let checkpoint = self.checkpoints.get(&self.device_id, entity).await?;
        let mut cursor = self.initial_cursor(entity, checkpoint.as_ref());
        let since = cursor.since;
        tally.watermark = Some(since);

        let live = self.bounded_source(entity, extractor.live_ids()).await?;
        let present = self.target.present_ids(collection).await?;
        let tombstones = self.bounded_source(entity, extractor.soft_deleted(since)).await?;

        let mut doomed: HashSet<i64> = present.difference(&live).copied().collect();
        doomed.extend(tombstones.iter().map(|tombstone| tombstone.id));
        if !doomed.is_empty() {
            let ids: Vec<i64> = doomed.into_iter().collect();
            tally.deleted = self.target.delete_by_ids(collection, &ids).await?;
        }

        let batch = self.config.batch_size(entity).unwrap_or(usize::MAX);
        let mut advanced = false;

        loop {
            if self.shutdown_requested() {
                debug!(entity = %entity, "shutdown requested; pass ends at the current checkpoint");
                break;
            }

            let page = self
                .bounded_source(entity, extractor.changed_page(cursor, batch))
                .await?;
            tally.skipped += page.skipped;

            let is_saturated = page.saturated(batch);
            if let Some(next) = page.next {
                if !page.docs.is_empty() {
                    let attempted = u64::try_from(page.docs.len()).unwrap_or(u64::MAX);
                    let summary = self.target.upsert_batch(collection, page.docs).await?;
                    tally.skipped += summary.failed;
                    tally.synced += attempted.saturating_sub(summary.failed);
                }
                // Checkpoint advances only after the batch is acknowledged.
                self.checkpoints
                    .upsert(&self.device_id, entity, next.since, Some(next.after_id), None)
                    .await?;
                tally.watermark = Some(next.since);
                cursor = next;
                advanced = true;
            }

            if !is_saturated {
                break;
            }
            tokio::time::sleep(self.config.inter_batch_delay()).await;
        }

        // A delete-only pass still advances past the swept tombstones once
        // the deletes and inserts above are acknowledged. The cursor id
        // resets so rows sharing the tombstone marker are not skipped.
        if let Some(max_tombstone) = tombstones.iter().map(|tombstone| tombstone.marker).max() {
            if max_tombstone > tally.watermark.unwrap_or(since) {
                self.checkpoints
                    .upsert(&self.device_id, entity, max_tombstone, Some(0), None)
                    .await?;
                tally.watermark = Some(max_tombstone);
                advanced = true;
            }
        }

        if !advanced {
            // No new rows: touch the checkpoint so UpdatedAt records the
            // pass; the store keeps LastSyncTime from regressing.
            self.checkpoints
                .upsert(&self.device_id, entity, since, None, None)
                .await?;
        }

        Ok(())
    }

    /// Window selection for a pass: checkpoint position, default window when
    /// absent, replay-horizon floor, and the post-backfill narrowing for
    /// transactions.
    fn initial_cursor(&self, entity: EntityKind, checkpoint: Option<&Checkpoint>) -> PageCursor {
        let now = Utc::now();
        let mut cursor = match checkpoint {
            Some(cp) => PageCursor {
                since: cp.last_sync_time,
                after_id: cp.last_record_id.unwrap_or(0),
            },
            None => PageCursor::start(now - self.config.default_window(entity)),
        };

        let horizon = now - self.config.replay_horizon();
        if cursor.since < horizon {
            cursor = PageCursor::start(horizon);
        }

        // Once the backfill has covered history, a lagging transaction
        // checkpoint no longer widens the window past the short default.
        if entity == EntityKind::Transaction
            && checkpoint.is_some_and(Checkpoint::bulk_completed)
        {
            let narrow = now - self.config.default_window(EntityKind::Transaction);
            if cursor.since < narrow {
                cursor = PageCursor::start(narrow);
            }
        }

        cursor
    }

    pub(crate) async fn bounded_source<T>(
        &self,
        entity: EntityKind,
        query: impl Future<Output = Result<T, SyncError>> + Send,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.config.source_deadline(), query).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Deadline {
                operation: format!("{entity} source query"),
                seconds: self.config.source_deadline().as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bson::doc;
    use chrono::Duration;
    use parking_lot::{Mutex, RwLock};
    use tillsync_core::{ChangedDoc, ChangedPage, SyncLogDoc};

    use super::*;
    use crate::config::ServiceConfig;
    use crate::extract::PageBuilder;
    use crate::logring::LogRing;
    use crate::status::StatusPublisher;
    use crate::store::memory::{MemoryCheckpointStore, MemoryTargetStore};
    use crate::traits::{BatchSummary, CheckpointStore, TargetStore, Tombstone};

    // -- scripted source ---------------------------------------------------

    #[derive(Debug, Clone)]
    pub(crate) struct ScriptedRow {
        pub id: i64,
        pub marker: DateTime<Utc>,
        pub poison: bool,
        pub payload: i32,
    }

    impl ScriptedRow {
        pub(crate) fn good(id: i64, marker: DateTime<Utc>, payload: i32) -> Self {
            Self {
                id,
                marker,
                poison: false,
                payload,
            }
        }

        pub(crate) fn poison(id: i64, marker: DateTime<Utc>) -> Self {
            Self {
                id,
                marker,
                poison: true,
                payload: 0,
            }
        }
    }

    /// Extractor over an in-memory script, honoring the keyset contract the
    /// real extractors implement in SQL.
    pub(crate) struct ScriptedExtractor {
        entity: EntityKind,
        pub rows: RwLock<Vec<ScriptedRow>>,
        pub live: RwLock<HashSet<i64>>,
        pub tombstones: RwLock<Vec<Tombstone>>,
        pub fail_pages: AtomicBool,
    }

    impl ScriptedExtractor {
        pub(crate) fn new(entity: EntityKind) -> Self {
            Self {
                entity,
                rows: RwLock::new(Vec::new()),
                live: RwLock::new(HashSet::new()),
                tombstones: RwLock::new(Vec::new()),
                fail_pages: AtomicBool::new(false),
            }
        }

        pub(crate) fn add_row(&self, row: ScriptedRow) {
            self.live.write().insert(row.id);
            self.rows.write().push(row);
        }
    }

    #[async_trait]
    impl EntityExtractor for ScriptedExtractor {
        fn entity(&self) -> EntityKind {
            self.entity
        }

        async fn changed_page(
            &self,
            cursor: PageCursor,
            batch: usize,
        ) -> Result<ChangedPage, SyncError> {
            if self.fail_pages.load(Ordering::SeqCst) {
                return Err(SyncError::Deadline {
                    operation: "scripted source".to_string(),
                    seconds: 0,
                });
            }

            let mut rows: Vec<ScriptedRow> = self
                .rows
                .read()
                .iter()
                .filter(|row| {
                    row.marker > cursor.since
                        || (row.marker == cursor.since && row.id > cursor.after_id)
                })
                .cloned()
                .collect();
            rows.sort_by_key(|row| (row.marker, row.id));
            rows.truncate(batch);

            let mut page = PageBuilder::new(self.entity);
            for row in rows {
                page.fetched(row.marker, row.id);
                if row.poison {
                    page.skip(row.id, &"scripted poison row");
                } else {
                    page.push(ChangedDoc {
                        id: row.id,
                        marker: row.marker,
                        document: doc! { "_id": row.id, "value": row.payload },
                    });
                }
            }
            Ok(page.finish())
        }

        async fn live_ids(&self) -> Result<HashSet<i64>, SyncError> {
            Ok(self.live.read().clone())
        }

        async fn soft_deleted(&self, since: DateTime<Utc>) -> Result<Vec<Tombstone>, SyncError> {
            Ok(self
                .tombstones
                .read()
                .iter()
                .copied()
                .filter(|tombstone| tombstone.marker > since)
                .collect())
        }
    }

    // -- recording/failing target -----------------------------------------

    /// Delegates to a memory store while recording batch summaries and
    /// optionally failing the first N batches.
    pub(crate) struct RecordingTarget {
        pub inner: MemoryTargetStore,
        pub summaries: Mutex<Vec<BatchSummary>>,
        pub fail_batches: AtomicU32,
    }

    impl RecordingTarget {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryTargetStore::new(),
                summaries: Mutex::new(Vec::new()),
                fail_batches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TargetStore for RecordingTarget {
        async fn upsert_batch(
            &self,
            collection: &str,
            docs: Vec<ChangedDoc>,
        ) -> Result<BatchSummary, SyncError> {
            let remaining = self.fail_batches.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_batches.store(remaining - 1, Ordering::SeqCst);
                return Err(SyncError::Deadline {
                    operation: format!("bulk upsert into {collection}"),
                    seconds: 0,
                });
            }
            let summary = self.inner.upsert_batch(collection, docs).await?;
            self.summaries.lock().push(summary);
            Ok(summary)
        }

        async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> Result<u64, SyncError> {
            self.inner.delete_by_ids(collection, ids).await
        }

        async fn present_ids(&self, collection: &str) -> Result<HashSet<i64>, SyncError> {
            self.inner.present_ids(collection).await
        }

        async fn insert_sync_log(&self, entry: &SyncLogDoc) -> Result<(), SyncError> {
            self.inner.insert_sync_log(entry).await
        }

        async fn ping(&self) -> Result<(), SyncError> {
            self.inner.ping().await
        }
    }

    /// Checkpoint store whose reads fail, to model an unreachable source.
    struct UnreachableCheckpointStore;

    #[async_trait]
    impl CheckpointStore for UnreachableCheckpointStore {
        async fn get(
            &self,
            _device_id: &str,
            _entity: EntityKind,
        ) -> Result<Option<Checkpoint>, SyncError> {
            Err(SyncError::Deadline {
                operation: "checkpoint read".to_string(),
                seconds: 0,
            })
        }

        async fn upsert(
            &self,
            _device_id: &str,
            _entity: EntityKind,
            _last_sync_time: DateTime<Utc>,
            _last_record_id: Option<i64>,
            _payload: Option<&str>,
        ) -> Result<(), SyncError> {
            Err(SyncError::Deadline {
                operation: "checkpoint write".to_string(),
                seconds: 0,
            })
        }
    }

    // -- harness -----------------------------------------------------------

    pub(crate) fn fast_config() -> ServiceConfig {
        let mut config = ServiceConfig::for_tests();
        config.inter_batch_delay_ms = 0;
        config
    }

    fn engine_with(
        config: ServiceConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        target: Arc<dyn TargetStore>,
        extractor: Arc<dyn EntityExtractor>,
    ) -> SyncEngine {
        SyncEngine::new(
            Arc::new(config),
            checkpoints,
            target,
            StatusPublisher::new(),
            Arc::new(LogRing::default()),
        )
        .with_extractor(extractor)
    }

    /// A marker comfortably inside every default window.
    pub(crate) fn recent(minutes_ago: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes_ago)
    }

    // -- scenarios ----------------------------------------------------------

    #[tokio::test]
    async fn first_pass_applies_default_window_and_sets_checkpoint() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        let fresh = recent(60);
        extractor.add_row(ScriptedRow::good(7, fresh, 1));
        // Older than the 30-day default window: never emitted.
        extractor.add_row(ScriptedRow::good(3, Utc::now() - Duration::days(40), 1));

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success, "pass failed: {:?}", result.error);
        assert_eq!(result.records_synced, 1);
        assert_eq!(result.last_sync_time, fresh);

        assert!(target.inner.document("products", 7).is_some());
        assert!(target.inner.document("products", 3).is_none());

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Product)
            .await
            .unwrap()
            .expect("checkpoint created");
        assert_eq!(checkpoint.last_sync_time, fresh);
        assert_eq!(checkpoint.last_record_id, Some(7));

        let logs = target.inner.sync_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_success);
    }

    #[tokio::test]
    async fn tied_markers_split_across_pages_without_truncation() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        let tied = recent(30);
        for id in 1..=3 {
            extractor.add_row(ScriptedRow::good(id, tied, 1));
        }

        let mut config = fast_config();
        config.product_batch_size = 2;

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            config,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);
        assert_eq!(result.records_synced, 3);

        // Two pages: saturated [1, 2] then trailing [3].
        let sizes: Vec<u64> = target
            .summaries
            .lock()
            .iter()
            .map(|summary| summary.inserted + summary.modified)
            .collect();
        assert_eq!(sizes, vec![2, 1]);

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Product)
            .await
            .unwrap()
            .expect("checkpoint");
        assert_eq!(checkpoint.last_sync_time, tied);
        assert_eq!(checkpoint.last_record_id, Some(3));

        // Nothing left: the next pass emits zero rows and stays put.
        let again = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(again.success);
        assert_eq!(again.records_synced, 0);
        assert_eq!(again.last_sync_time, tied);
    }

    #[tokio::test]
    async fn soft_deleted_row_is_removed_and_checkpoint_advances() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Transaction));
        let t0 = recent(120);
        let t1 = recent(10);

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());

        // Pass 1: transaction 42 is live.
        extractor.add_row(ScriptedRow::good(42, t0, 5));
        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );
        assert!(engine.run_entity_pass(extractor.as_ref()).await.success);
        assert!(target.inner.document("transactions", 42).is_some());

        // Between passes the row is soft-deleted at t1.
        extractor.rows.write().clear();
        extractor.live.write().clear();
        extractor.tombstones.write().push(Tombstone { id: 42, marker: t1 });

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);
        assert!(result.records_deleted >= 1);
        assert!(target.inner.document("transactions", 42).is_none());

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Transaction)
            .await
            .unwrap()
            .expect("checkpoint");
        assert_eq!(checkpoint.last_sync_time, t1);
    }

    #[tokio::test]
    async fn deleted_then_recreated_id_ends_up_present() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Transaction));
        let t0 = recent(120);
        let t1 = recent(20);
        let t2 = recent(5);

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        extractor.add_row(ScriptedRow::good(42, t0, 1));

        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );
        assert!(engine.run_entity_pass(extractor.as_ref()).await.success);

        // Soft-deleted at t1, recreated with new content at t2.
        extractor.rows.write().clear();
        extractor.live.write().clear();
        extractor.tombstones.write().push(Tombstone { id: 42, marker: t1 });
        extractor.add_row(ScriptedRow::good(42, t2, 2));

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);

        let doc = target
            .inner
            .document("transactions", 42)
            .expect("recreated row present after delete-before-insert");
        assert_eq!(doc.get_i32("value").unwrap(), 2);

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Transaction)
            .await
            .unwrap()
            .expect("checkpoint");
        assert_eq!(checkpoint.last_sync_time, t2);
    }

    #[tokio::test]
    async fn replay_after_lost_checkpoint_is_idempotent() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Customer));
        let marker = recent(45);
        for id in 1..=5 {
            extractor.add_row(ScriptedRow::good(id, marker, 9));
        }

        let target = Arc::new(RecordingTarget::new());

        let first = engine_with(
            fast_config(),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );
        assert!(first.run_entity_pass(extractor.as_ref()).await.success);

        // The checkpoint write was lost: a new store replays the window.
        let replay_checkpoints = Arc::new(MemoryCheckpointStore::new());
        let second = engine_with(
            fast_config(),
            Arc::clone(&replay_checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );
        let result = second.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);

        // The replayed batch matched byte-for-byte: zero write differences.
        let last = *target.summaries.lock().last().unwrap();
        assert_eq!(last, BatchSummary::default());

        let checkpoint = replay_checkpoints
            .get("primary-till", EntityKind::Customer)
            .await
            .unwrap()
            .expect("checkpoint recreated");
        assert_eq!(checkpoint.last_sync_time, marker);
        assert_eq!(checkpoint.last_record_id, Some(5));
        assert_eq!(
            target.inner.present_ids("customers").await.unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn failed_batch_leaves_checkpoint_untouched_then_recovers() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        extractor.add_row(ScriptedRow::good(1, recent(30), 1));

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        target.fail_batches.store(1, Ordering::SeqCst);

        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let failed = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(!failed.success);
        assert!(failed.error.is_some());
        assert!(checkpoints
            .get("primary-till", EntityKind::Product)
            .await
            .unwrap()
            .is_none());

        // Next tick: the same window replays and succeeds.
        let recovered = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(recovered.success);
        assert_eq!(recovered.records_synced, 1);
        assert!(checkpoints
            .get("primary-till", EntityKind::Product)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn poison_rows_are_skipped_and_cursor_advances_past_them() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        let last = recent(5);
        extractor.add_row(ScriptedRow::good(1, recent(15), 1));
        extractor.add_row(ScriptedRow::poison(2, recent(10)));
        extractor.add_row(ScriptedRow::good(3, last, 3));

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success, "poison rows must not fail the pass");
        assert_eq!(result.records_synced, 2);
        assert_eq!(result.records_skipped, 1);

        assert!(target.inner.document("products", 1).is_some());
        assert!(target.inner.document("products", 2).is_none());
        assert!(target.inner.document("products", 3).is_some());

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Product)
            .await
            .unwrap()
            .expect("checkpoint");
        assert_eq!(checkpoint.last_sync_time, last);
    }

    #[tokio::test]
    async fn empty_source_succeeds_and_touches_the_checkpoint() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Expense));
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);
        assert_eq!(result.records_synced, 0);
        assert!(target.summaries.lock().is_empty());

        let checkpoint = checkpoints
            .get("primary-till", EntityKind::Expense)
            .await
            .unwrap()
            .expect("touch creates the checkpoint on first pass");
        let expected = Utc::now() - Duration::days(30);
        let drift = (checkpoint.last_sync_time - expected).num_seconds().abs();
        assert!(drift < 10, "window start drifted {drift}s from expected");
    }

    #[tokio::test]
    async fn checkpoint_store_failure_aborts_before_target_writes() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        extractor.add_row(ScriptedRow::good(1, recent(30), 1));

        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            fast_config(),
            Arc::new(UnreachableCheckpointStore),
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(!result.success);
        assert!(target.summaries.lock().is_empty());
        assert!(target.inner.present_ids("products").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_backfill_narrows_a_lagging_transaction_window() {
        let extractor = Arc::new(ScriptedExtractor::new(EntityKind::Transaction));
        let stale = Utc::now() - Duration::days(5);
        let fresh = recent(60);
        extractor.add_row(ScriptedRow::good(1, stale, 1));
        extractor.add_row(ScriptedRow::good(2, fresh, 2));

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        // Backfill finished, but the incremental checkpoint lags 10 days.
        checkpoints
            .upsert(
                "primary-till",
                EntityKind::Transaction,
                Utc::now() - Duration::days(10),
                None,
                Some(tillsync_core::BULK_COMPLETED),
            )
            .await
            .unwrap();

        let target = Arc::new(RecordingTarget::new());
        let engine = engine_with(
            fast_config(),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
            Arc::clone(&target) as Arc<dyn TargetStore>,
            Arc::clone(&extractor) as Arc<dyn EntityExtractor>,
        );

        let result = engine.run_entity_pass(extractor.as_ref()).await;
        assert!(result.success);
        // Only the row inside the narrowed 3-day window is emitted.
        assert_eq!(result.records_synced, 1);
        assert!(target.inner.document("transactions", 2).is_some());
        assert!(target.inner.document("transactions", 1).is_none());
    }

    #[tokio::test]
    async fn run_cycle_isolates_entity_failures() {
        use crate::traits::SyncRunner;

        let failing = Arc::new(ScriptedExtractor::new(EntityKind::Product));
        failing.fail_pages.store(true, Ordering::SeqCst);
        let healthy = Arc::new(ScriptedExtractor::new(EntityKind::Customer));
        healthy.add_row(ScriptedRow::good(1, recent(30), 1));

        let target = Arc::new(RecordingTarget::new());
        let engine = SyncEngine::new(
            Arc::new(fast_config()),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::clone(&target) as Arc<dyn TargetStore>,
            StatusPublisher::new(),
            Arc::new(LogRing::default()),
        )
        .with_extractor(Arc::clone(&failing) as Arc<dyn EntityExtractor>)
        .with_extractor(Arc::clone(&healthy) as Arc<dyn EntityExtractor>);

        let results = engine.run_cycle().await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success, "a failing entity must not stop the rest");
        assert_eq!(results[1].records_synced, 1);

        // Both outcomes landed in sync_logs.
        assert_eq!(target.inner.sync_logs().len(), 2);
    }
}
