//! Product extractor.
//!
//! Batched keyset pagination on `COALESCE(UpdatedAt, CreatedAt)`, so rows
//! that have never been updated surface once when their creation time enters
//! the window. Each document carries its category's name by value.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{ChangedPage, EntityKind, PageCursor, ProductDoc};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const CHANGED_PAGE: &str = r#"
SELECT p."ProductId", p."Barcode", p."Name", p."Description", p."CategoryId",
       c."Name" AS "CategoryName",
       p."PurchasePrice", p."SalePrice", p."CurrentStock", p."MinimumStock",
       p."SupplierId", p."IsActive", p."CreatedAt", p."Speed", p."UpdatedAt", p."ImagePath",
       COALESCE(p."UpdatedAt", p."CreatedAt") AS "Marker"
FROM "Products" p
LEFT JOIN "Categories" c ON c."CategoryId" = p."CategoryId"
WHERE p."IsActive" = TRUE
  AND (COALESCE(p."UpdatedAt", p."CreatedAt") > $1
   OR (COALESCE(p."UpdatedAt", p."CreatedAt") = $1 AND p."ProductId" > $2))
ORDER BY "Marker", p."ProductId"
LIMIT $3
"#;

const LIVE_IDS: &str = r#"SELECT "ProductId" FROM "Products" WHERE "IsActive" = TRUE"#;

#[derive(Debug, Clone, FromRow)]
pub struct ProductRow {
    #[sqlx(rename = "ProductId")]
    pub product_id: i32,
    #[sqlx(rename = "Barcode")]
    pub barcode: Option<String>,
    #[sqlx(rename = "Name")]
    pub name: String,
    #[sqlx(rename = "Description")]
    pub description: Option<String>,
    #[sqlx(rename = "CategoryId")]
    pub category_id: Option<i32>,
    #[sqlx(rename = "CategoryName")]
    pub category_name: Option<String>,
    #[sqlx(rename = "PurchasePrice")]
    pub purchase_price: Decimal,
    #[sqlx(rename = "SalePrice")]
    pub sale_price: Decimal,
    #[sqlx(rename = "CurrentStock")]
    pub current_stock: Decimal,
    #[sqlx(rename = "MinimumStock")]
    pub minimum_stock: Decimal,
    #[sqlx(rename = "SupplierId")]
    pub supplier_id: Option<i32>,
    #[sqlx(rename = "IsActive")]
    pub is_active: bool,
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "Speed")]
    pub speed: Option<String>,
    #[sqlx(rename = "UpdatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "ImagePath")]
    pub image_path: Option<String>,
}

impl ProductRow {
    /// Effective modification marker: `UpdatedAt` with `CreatedAt` fallback.
    #[must_use]
    pub fn marker(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn into_doc(self, synced_at: DateTime<Utc>) -> ProductDoc {
        ProductDoc {
            id: i64::from(self.product_id),
            product_id: i64::from(self.product_id),
            barcode: self.barcode.unwrap_or_default(),
            name: self.name,
            description: self.description.unwrap_or_default(),
            category_id: self.category_id.map(i64::from),
            category_name: self.category_name.unwrap_or_default(),
            purchase_price: self.purchase_price,
            sale_price: self.sale_price,
            current_stock: self.current_stock,
            minimum_stock: self.minimum_stock,
            supplier_id: self.supplier_id.map(i64::from),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            speed: self.speed.unwrap_or_default(),
            image_path: self.image_path.unwrap_or_default(),
            synced_at,
        }
    }
}

pub struct ProductExtractor {
    pool: PgPool,
}

impl ProductExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityExtractor for ProductExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Product
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
        let mut page = PageBuilder::new(EntityKind::Product);
        for raw in rows {
            let id: i32 = raw.try_get("ProductId")?;
            let marker: DateTime<Utc> = raw.try_get("Marker")?;
            page.fetched(marker, i64::from(id));

            match ProductRow::from_row(&raw) {
                Ok(row) => {
                    let doc = row.into_doc(synced_at);
                    match bson::to_document(&doc) {
                        Ok(document) => page.push(tillsync_core::ChangedDoc {
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
