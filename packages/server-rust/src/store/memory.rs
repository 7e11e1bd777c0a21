//! In-memory store implementations.
//!
//! Used by the engine tests and by local development runs that have no
//! MongoDB at hand. Semantics mirror the production stores: upserts count
//! `modified` only when content actually changes, checkpoint time never
//! regresses, payload and cursor id update only when provided.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tillsync_core::{ChangedDoc, Checkpoint, EntityKind, SyncLogDoc};

use crate::error::SyncError;
use crate::traits::{BatchSummary, CheckpointStore, TargetStore};

/// [`TargetStore`] over plain maps.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    collections: RwLock<HashMap<String, BTreeMap<i64, Document>>>,
    sync_logs: RwLock<Vec<SyncLogDoc>>,
}

impl MemoryTargetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of one stored document, for assertions.
    #[must_use]
    pub fn document(&self, collection: &str, id: i64) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|coll| coll.get(&id))
            .cloned()
    }

    /// All sync-log entries in insertion order.
    #[must_use]
    pub fn sync_logs(&self) -> Vec<SyncLogDoc> {
        self.sync_logs.read().clone()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: Vec<ChangedDoc>,
    ) -> Result<BatchSummary, SyncError> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        let mut summary = BatchSummary::default();
        for doc in docs {
            match coll.get(&doc.id) {
                None => {
                    coll.insert(doc.id, doc.document);
                    summary.inserted += 1;
                }
                Some(existing) if *existing == doc.document => {
                    // Matched but unchanged: not a modification.
                }
                Some(_) => {
                    coll.insert(doc.id, doc.document);
                    summary.modified += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> Result<u64, SyncError> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if coll.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn present_ids(&self, collection: &str) -> Result<HashSet<i64>, SyncError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|coll| coll.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn insert_sync_log(&self, entry: &SyncLogDoc) -> Result<(), SyncError> {
        self.sync_logs.write().push(entry.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// [`CheckpointStore`] over a plain map.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    rows: RwLock<HashMap<(String, EntityKind), Checkpoint>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        device_id: &str,
        entity: EntityKind,
    ) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self
            .rows
            .read()
            .get(&(device_id.to_string(), entity))
            .cloned())
    }

    async fn upsert(
        &self,
        device_id: &str,
        entity: EntityKind,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let mut rows = self.rows.write();
        rows.entry((device_id.to_string(), entity))
            .and_modify(|row| {
                row.last_sync_time = row.last_sync_time.max(last_sync_time);
                if last_record_id.is_some() {
                    row.last_record_id = last_record_id;
                }
                if let Some(payload) = payload {
                    row.payload = Some(payload.to_string());
                }
                row.updated_at = now;
            })
            .or_insert_with(|| Checkpoint {
                device_id: device_id.to_string(),
                entity,
                last_sync_time,
                last_record_id,
                payload: payload.map(str::to_string),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }
}
