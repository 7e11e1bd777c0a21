//! MongoDB-backed [`TargetStore`].
//!
//! Upserts go through the client-level unordered `bulkWrite` so one bad
//! document reports an error without failing its batch. Every bulk call is
//! bounded by the configured socket deadline; the driver has no per-socket
//! timeout knob, so the deadline is enforced around the call.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, ReplaceOneModel, WriteModel};
use mongodb::{Client, Database, Namespace};
use tillsync_core::{ChangedDoc, SyncLogDoc};
use tracing::{info, warn};

use crate::error::SyncError;
use crate::traits::{BatchSummary, TargetStore};

/// Collection receiving one document per completed pass.
pub const SYNC_LOG_COLLECTION: &str = "sync_logs";

pub struct MongoTargetStore {
    client: Client,
    db: Database,
    db_name: String,
    bulk_deadline: Duration,
}

impl MongoTargetStore {
    /// Connect and select the target database.
    ///
    /// # Errors
    /// URI parse or client construction failures.
    pub async fn connect(
        url: &str,
        db_name: &str,
        server_selection_timeout: Duration,
        bulk_deadline: Duration,
    ) -> Result<Self, SyncError> {
        let mut options = ClientOptions::parse(url).await?;
        options.server_selection_timeout = Some(server_selection_timeout);
        options.app_name = Some("tillsync".to_string());
        let client = Client::with_options(options)?;
        let db = client.database(db_name);
        info!(db = db_name, "target document store client ready");
        Ok(Self {
            client,
            db,
            db_name: db_name.to_string(),
            bulk_deadline,
        })
    }

    // Driver calls are builder "actions" that implement IntoFuture, not
    // Future, hence the wider bound.
    async fn bounded<F, T>(
        &self,
        operation: &str,
        call: F,
    ) -> Result<Result<T, mongodb::error::Error>, SyncError>
    where
        F: std::future::IntoFuture<Output = Result<T, mongodb::error::Error>>,
        F::IntoFuture: Send,
    {
        tokio::time::timeout(self.bulk_deadline, call.into_future())
            .await
            .map_err(|_| SyncError::Deadline {
                operation: operation.to_string(),
                seconds: self.bulk_deadline.as_secs(),
            })
    }
}

#[async_trait]
impl TargetStore for MongoTargetStore {
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: Vec<ChangedDoc>,
    ) -> Result<BatchSummary, SyncError> {
        if docs.is_empty() {
            return Ok(BatchSummary::default());
        }

        let namespace = Namespace::new(self.db_name.clone(), collection);
        let models: Vec<WriteModel> = docs
            .into_iter()
            .map(|doc| {
                WriteModel::ReplaceOne(
                    ReplaceOneModel::builder()
                        .namespace(namespace.clone())
                        .filter(doc! { "_id": doc.id })
                        .replacement(doc.document)
                        .upsert(true)
                        .build(),
                )
            })
            .collect();

        let operation = format!("bulk upsert into {collection}");
        let outcome = self
            .bounded(&operation, self.client.bulk_write(models).ordered(false))
            .await?;

        match outcome {
            Ok(result) => Ok(BatchSummary {
                inserted: u64::try_from(result.upserted_count).unwrap_or_default(),
                modified: u64::try_from(result.modified_count).unwrap_or_default(),
                failed: 0,
            }),
            Err(error) => match error.kind.as_ref() {
                ErrorKind::BulkWrite(failure) => {
                    for (index, write_error) in &failure.write_errors {
                        warn!(
                            collection,
                            index = *index,
                            code = write_error.code,
                            message = %write_error.message,
                            "bulk write entry failed"
                        );
                    }
                    Ok(BatchSummary {
                        inserted: 0,
                        modified: 0,
                        failed: u64::try_from(failure.write_errors.len()).unwrap_or(u64::MAX),
                    })
                }
                _ => Err(SyncError::Target(error)),
            },
        }
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> Result<u64, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let coll = self.db.collection::<Document>(collection);
        let operation = format!("bulk delete from {collection}");
        let result = self
            .bounded(&operation, coll.delete_many(doc! { "_id": { "$in": ids.to_vec() } }))
            .await??;
        Ok(result.deleted_count)
    }

    async fn present_ids(&self, collection: &str) -> Result<HashSet<i64>, SyncError> {
        let coll = self.db.collection::<Document>(collection);
        let mut cursor = coll.find(doc! {}).projection(doc! { "_id": 1 }).await?;
        let mut ids = HashSet::new();
        while let Some(doc) = cursor.try_next().await? {
            match doc.get("_id") {
                Some(Bson::Int64(id)) => {
                    ids.insert(*id);
                }
                Some(Bson::Int32(id)) => {
                    ids.insert(i64::from(*id));
                }
                other => warn!(collection, id = ?other, "non-integer _id in target collection"),
            }
        }
        Ok(ids)
    }

    async fn insert_sync_log(&self, entry: &SyncLogDoc) -> Result<(), SyncError> {
        self.db
            .collection::<SyncLogDoc>(SYNC_LOG_COLLECTION)
            .insert_one(entry)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
