//! Customer extractor. Same keyset shape as products, no embedded data.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{ChangedDoc, ChangedPage, CustomerDoc, EntityKind, PageCursor};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const CHANGED_PAGE: &str = r#"
SELECT "CustomerId", "Name", "Phone", "Email", "Address", "IsActive",
       "CreatedAt", "UpdatedAt", "Balance",
       COALESCE("UpdatedAt", "CreatedAt") AS "Marker"
FROM "Customers"
WHERE "IsActive" = TRUE
  AND (COALESCE("UpdatedAt", "CreatedAt") > $1
   OR (COALESCE("UpdatedAt", "CreatedAt") = $1 AND "CustomerId" > $2))
ORDER BY "Marker", "CustomerId"
LIMIT $3
"#;

const LIVE_IDS: &str = r#"SELECT "CustomerId" FROM "Customers" WHERE "IsActive" = TRUE"#;

#[derive(Debug, Clone, FromRow)]
pub struct CustomerRow {
    #[sqlx(rename = "CustomerId")]
    pub customer_id: i32,
    #[sqlx(rename = "Name")]
    pub name: String,
    #[sqlx(rename = "Phone")]
    pub phone: Option<String>,
    #[sqlx(rename = "Email")]
    pub email: Option<String>,
    #[sqlx(rename = "Address")]
    pub address: Option<String>,
    #[sqlx(rename = "IsActive")]
    pub is_active: bool,
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "Balance")]
    pub balance: Decimal,
}

impl CustomerRow {
    #[must_use]
    pub fn marker(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn into_doc(self, synced_at: DateTime<Utc>) -> CustomerDoc {
        CustomerDoc {
            id: i64::from(self.customer_id),
            customer_id: i64::from(self.customer_id),
            name: self.name,
            phone: self.phone.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            balance: self.balance,
            synced_at,
        }
    }
}

pub struct CustomerExtractor {
    pool: PgPool,
}

impl CustomerExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityExtractor for CustomerExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Customer
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
        let mut page = PageBuilder::new(EntityKind::Customer);
        for raw in rows {
            let id: i32 = raw.try_get("CustomerId")?;
            let marker: DateTime<Utc> = raw.try_get("Marker")?;
            page.fetched(marker, i64::from(id));

            match CustomerRow::from_row(&raw) {
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
