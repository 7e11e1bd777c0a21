//! Category extractor.
//!
//! Categories carry no modification marker, so every pass takes a full
//! snapshot of the live rows. Rows are stamped with the extraction instant
//! so checkpoint advancement stays monotonic; the cardinality is small
//! enough that the page is never batched.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{CategoryDoc, ChangedDoc, ChangedPage, EntityKind, PageCursor};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const SNAPSHOT: &str = r#"
SELECT "CategoryId", "Name", "Description", "IsActive", "Type"
FROM "Categories"
WHERE "IsActive" = TRUE
ORDER BY "CategoryId"
"#;

const LIVE_IDS: &str = r#"SELECT "CategoryId" FROM "Categories" WHERE "IsActive" = TRUE"#;

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    #[sqlx(rename = "CategoryId")]
    pub category_id: i32,
    #[sqlx(rename = "Name")]
    pub name: String,
    #[sqlx(rename = "Description")]
    pub description: Option<String>,
    #[sqlx(rename = "IsActive")]
    pub is_active: bool,
    #[sqlx(rename = "Type")]
    pub kind: Option<String>,
}

impl CategoryRow {
    #[must_use]
    pub fn into_doc(self, synced_at: DateTime<Utc>) -> CategoryDoc {
        CategoryDoc {
            id: i64::from(self.category_id),
            category_id: i64::from(self.category_id),
            name: self.name,
            description: self.description.unwrap_or_default(),
            kind: self.kind.unwrap_or_default(),
            is_active: self.is_active,
            synced_at,
        }
    }
}

pub struct CategoryExtractor {
    pool: PgPool,
}

impl CategoryExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityExtractor for CategoryExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Category
    }

    async fn changed_page(
        &self,
        _cursor: PageCursor,
        _batch: usize,
    ) -> Result<ChangedPage, SyncError> {
        let rows = sqlx::query(SNAPSHOT).fetch_all(&self.pool).await?;

        let snapshot_at = Utc::now();
        let mut page = PageBuilder::new(EntityKind::Category);
        for raw in rows {
            let id: i32 = raw.try_get("CategoryId")?;
            page.fetched(snapshot_at, i64::from(id));

            match CategoryRow::from_row(&raw) {
                Ok(row) => {
                    let doc = row.into_doc(snapshot_at);
                    match bson::to_document(&doc) {
                        Ok(document) => page.push(ChangedDoc {
                            id: doc.id,
                            marker: snapshot_at,
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
