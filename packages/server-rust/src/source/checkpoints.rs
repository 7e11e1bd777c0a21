//! Checkpoint store backed by the `SyncCheckpoints` table in the source
//! database itself, so checkpoint updates share fate with source reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tillsync_core::{Checkpoint, EntityKind};
use tracing::warn;

use crate::error::SyncError;
use crate::traits::CheckpointStore;

const ENSURE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS "SyncCheckpoints" (
    "Id"              BIGSERIAL PRIMARY KEY,
    "DeviceId"        TEXT NOT NULL,
    "EntityType"      TEXT NOT NULL,
    "LastSyncTime"    TIMESTAMPTZ NOT NULL,
    "LastRecordId"    BIGINT,
    "LastDeleteCheck" TIMESTAMPTZ,
    "CheckpointData"  TEXT,
    "CreatedAt"       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    "UpdatedAt"       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const ENSURE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS "UX_SyncCheckpoints_DeviceId_EntityType"
ON "SyncCheckpoints" ("DeviceId", "EntityType")
"#;

const SELECT_ONE: &str = r#"
SELECT "LastSyncTime", "LastRecordId", "CheckpointData", "CreatedAt", "UpdatedAt"
FROM "SyncCheckpoints"
WHERE "DeviceId" = $1 AND "EntityType" = $2
"#;

// GREATEST keeps LastSyncTime monotonic even if a losing writer lands last;
// COALESCE leaves the cursor id and payload alone when the caller does not
// provide them.
const UPSERT: &str = r#"
INSERT INTO "SyncCheckpoints"
    ("DeviceId", "EntityType", "LastSyncTime", "LastRecordId", "CheckpointData", "CreatedAt", "UpdatedAt")
VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
ON CONFLICT ("DeviceId", "EntityType") DO UPDATE SET
    "LastSyncTime"   = GREATEST("SyncCheckpoints"."LastSyncTime", EXCLUDED."LastSyncTime"),
    "LastRecordId"   = COALESCE(EXCLUDED."LastRecordId", "SyncCheckpoints"."LastRecordId"),
    "CheckpointData" = COALESCE(EXCLUDED."CheckpointData", "SyncCheckpoints"."CheckpointData"),
    "UpdatedAt"      = NOW()
"#;

/// PostgreSQL-backed [`CheckpointStore`].
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint table and its unique index if missing. Run
    /// once at startup.
    ///
    /// # Errors
    /// DDL failures (insufficient privileges, unreachable source).
    pub async fn ensure_schema(&self) -> Result<(), SyncError> {
        sqlx::query(ENSURE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(SyncError::Checkpoint)?;
        sqlx::query(ENSURE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(SyncError::Checkpoint)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(
        &self,
        device_id: &str,
        entity: EntityKind,
    ) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(SELECT_ONE)
            .bind(device_id)
            .bind(entity.collection())
            .fetch_optional(&self.pool)
            .await
            .map_err(SyncError::Checkpoint)?;

        let Some(row) = row else {
            return Ok(None);
        };

        // A row that exists but does not decode is treated as absent: the
        // engine restarts from the default window, which is always safe.
        match decode_checkpoint(&row, device_id, entity) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(error) => {
                warn!(device_id, entity = %entity, %error, "undecodable checkpoint row; treating as absent");
                Ok(None)
            }
        }
    }

    async fn upsert(
        &self,
        device_id: &str,
        entity: EntityKind,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> Result<(), SyncError> {
        sqlx::query(UPSERT)
            .bind(device_id)
            .bind(entity.collection())
            .bind(last_sync_time)
            .bind(last_record_id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(SyncError::Checkpoint)?;
        Ok(())
    }
}

fn decode_checkpoint(
    row: &sqlx::postgres::PgRow,
    device_id: &str,
    entity: EntityKind,
) -> Result<Checkpoint, sqlx::Error> {
    Ok(Checkpoint {
        device_id: device_id.to_string(),
        entity,
        last_sync_time: row.try_get("LastSyncTime")?,
        last_record_id: row.try_get("LastRecordId")?,
        payload: row.try_get("CheckpointData")?,
        created_at: row.try_get("CreatedAt")?,
        updated_at: row.try_get("UpdatedAt")?,
    })
}
