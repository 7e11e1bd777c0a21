//! Business-settings extractor.
//!
//! Small table, no batching, but still filtered by `LastModified` so an
//! unchanged settings table costs one empty query per pass. Settings have no
//! soft-delete flag; every row is live.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{BusinessSettingDoc, ChangedDoc, ChangedPage, EntityKind, PageCursor};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const CHANGED: &str = r#"
SELECT "Id", "Key", "Value", "Description", "Group", "DataType",
       "IsSystem", "LastModified", "ModifiedBy"
FROM "BusinessSettings"
WHERE "LastModified" > $1
ORDER BY "LastModified", "Id"
"#;

const LIVE_IDS: &str = r#"SELECT "Id" FROM "BusinessSettings""#;

#[derive(Debug, Clone, FromRow)]
pub struct BusinessSettingRow {
    #[sqlx(rename = "Id")]
    pub id: i32,
    #[sqlx(rename = "Key")]
    pub key: String,
    #[sqlx(rename = "Value")]
    pub value: Option<String>,
    #[sqlx(rename = "Description")]
    pub description: Option<String>,
    #[sqlx(rename = "Group")]
    pub group: Option<String>,
    #[sqlx(rename = "DataType")]
    pub data_type: Option<String>,
    #[sqlx(rename = "IsSystem")]
    pub is_system: bool,
    #[sqlx(rename = "LastModified")]
    pub last_modified: DateTime<Utc>,
    #[sqlx(rename = "ModifiedBy")]
    pub modified_by: Option<String>,
}

impl BusinessSettingRow {
    #[must_use]
    pub fn into_doc(self, synced_at: DateTime<Utc>) -> BusinessSettingDoc {
        BusinessSettingDoc {
            id: i64::from(self.id),
            setting_id: i64::from(self.id),
            key: self.key,
            value: self.value.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            group: self.group.unwrap_or_default(),
            data_type: self.data_type.unwrap_or_default(),
            is_system: self.is_system,
            last_modified: self.last_modified,
            modified_by: self.modified_by.unwrap_or_default(),
            synced_at,
        }
    }
}

pub struct BusinessSettingExtractor {
    pool: PgPool,
}

impl BusinessSettingExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityExtractor for BusinessSettingExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::BusinessSetting
    }

    async fn changed_page(
        &self,
        cursor: PageCursor,
        _batch: usize,
    ) -> Result<ChangedPage, SyncError> {
        let rows = sqlx::query(CHANGED)
            .bind(cursor.since)
            .fetch_all(&self.pool)
            .await?;

        let synced_at = Utc::now();
        let mut page = PageBuilder::new(EntityKind::BusinessSetting);
        for raw in rows {
            let id: i32 = raw.try_get("Id")?;
            let marker: DateTime<Utc> = raw.try_get("LastModified")?;
            page.fetched(marker, i64::from(id));

            match BusinessSettingRow::from_row(&raw) {
                Ok(row) => {
                    let doc = row.into_doc(synced_at);
                    match bson::to_document(&doc) {
                        Ok(document) => page.push(ChangedDoc {
                            id: doc.id,
                            marker,
                            document,
                        }),
                        Err(error) => page.skip(i64::from(id), &error),
                    }
                }
                Err(error) => page.skip(i64::from(id), &error),
            }
        }
        Ok(page.finish())
    }

    async fn live_ids(&self) -> Result<HashSet<i64>, SyncError> {
        let ids: Vec<i32> = sqlx::query_scalar(LIVE_IDS).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().map(i64::from).collect())
    }
}
