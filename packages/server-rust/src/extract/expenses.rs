//! Expense extractor. Keyset-batched; expenses have no soft-delete flag, so
//! every primary key counts as live and removals surface only through hard
//! deletes in the source.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{ChangedDoc, ChangedPage, EntityKind, ExpenseDoc, PageCursor};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const CHANGED_PAGE: &str = r#"
SELECT "ExpenseId", "Reason", "Amount", "Date", "Notes", "Category",
       "IsRecurring", "CreatedAt", "UpdatedAt",
       COALESCE("UpdatedAt", "CreatedAt") AS "Marker"
FROM "Expenses"
WHERE COALESCE("UpdatedAt", "CreatedAt") > $1
   OR (COALESCE("UpdatedAt", "CreatedAt") = $1 AND "ExpenseId" > $2)
ORDER BY "Marker", "ExpenseId"
LIMIT $3
"#;

const LIVE_IDS: &str = r#"SELECT "ExpenseId" FROM "Expenses""#;

#[derive(Debug, Clone, FromRow)]
pub struct ExpenseRow {
    #[sqlx(rename = "ExpenseId")]
    pub expense_id: i32,
    #[sqlx(rename = "Reason")]
    pub reason: String,
    #[sqlx(rename = "Amount")]
    pub amount: Decimal,
    #[sqlx(rename = "Date")]
    pub date: DateTime<Utc>,
    #[sqlx(rename = "Notes")]
    pub notes: Option<String>,
    #[sqlx(rename = "Category")]
    pub category: Option<String>,
    #[sqlx(rename = "IsRecurring")]
    pub is_recurring: bool,
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExpenseRow {
    #[must_use]
    pub fn marker(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn into_doc(self, synced_at: DateTime<Utc>) -> ExpenseDoc {
        ExpenseDoc {
            id: i64::from(self.expense_id),
            expense_id: i64::from(self.expense_id),
            reason: self.reason,
            amount: self.amount,
            date: self.date,
            notes: self.notes.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            is_recurring: self.is_recurring,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at,
        }
    }
}

pub struct ExpenseExtractor {
    pool: PgPool,
}

impl ExpenseExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityExtractor for ExpenseExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Expense
    }

    async fn changed_page(
        &self,
        cursor: PageCursor,
        batch: usize,
    ) -> Result<ChangedPage, SyncError> {
        let rows = sqlx::query(CHANGED_PAGE)
            .bind(cursor.since)
            .bind(cursor.after_id)
            .bind(i64::try_from(batch).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let synced_at = Utc::now();
        let mut page = PageBuilder::new(EntityKind::Expense);
        for raw in rows {
            let id: i32 = raw.try_get("ExpenseId")?;
            let marker: DateTime<Utc> = raw.try_get("Marker")?;
            page.fetched(marker, i64::from(id));

            match ExpenseRow::from_row(&raw) {
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
