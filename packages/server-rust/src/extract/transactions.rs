//! Transaction extractor with embedded line items.
//!
//! Incremental filter: `ModifiedDate > cursor AND IsDeleted = FALSE`, keyset
//! on `(ModifiedDate, TransactionId)`. A separate sweep surfaces soft-deleted
//! ids so the engine can propagate tombstones before inserting. The extractor
//! also implements [`BulkSource`]: the historical backfill walks
//! `TransactionDate` windows through the same row assembly.
//!
//! Size guard: a document that serializes over [`MAX_DOCUMENT_BYTES`] is
//! re-emitted without its line items, flagged `detailsRemovedForSize` with
//! the original child count so a repair pass can find it.

use std::collections::HashSet;

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{
    ChangedDoc, ChangedPage, EntityKind, PageCursor, TransactionDetailDoc, TransactionDoc,
    TransactionStatus, TransactionType,
};
use tracing::warn;

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::{BulkSource, EntityExtractor, HistorySpan, Tombstone};

/// Per-document ceiling accepted by the target store.
pub const MAX_DOCUMENT_BYTES: usize = 15 * 1024 * 1024;

const CHANGED_PAGE: &str = r#"
SELECT "TransactionId", "CustomerId", "CustomerName", "TotalAmount",
       "PaidAmount", "TransactionDate", "TransactionType", "Status", "PaymentMethod",
       "CashierId", "CashierName", "CashierRole", "CreatedDate", "ModifiedDate",
       "ModifiedDate" AS "Marker"
FROM "Transactions"
WHERE "IsDeleted" = FALSE
  AND ("ModifiedDate" > $1 OR ("ModifiedDate" = $1 AND "TransactionId" > $2))
ORDER BY "Marker", "TransactionId"
LIMIT $3
"#;

const WINDOW_PAGE: &str = r#"
SELECT "TransactionId", "CustomerId", "CustomerName", "TotalAmount",
       "PaidAmount", "TransactionDate", "TransactionType", "Status", "PaymentMethod",
       "CashierId", "CashierName", "CashierRole", "CreatedDate", "ModifiedDate",
       "TransactionDate" AS "Marker"
FROM "Transactions"
WHERE "IsDeleted" = FALSE
  AND "TransactionDate" >= $1 AND "TransactionDate" < $2
  AND ("TransactionDate" > $3 OR ("TransactionDate" = $3 AND "TransactionId" > $4))
ORDER BY "Marker", "TransactionId"
LIMIT $5
"#;

const CHILDREN: &str = r#"
SELECT "TransactionDetailId", "TransactionId", "ProductId", "Quantity",
       "UnitPrice", "PurchasePrice", "Discount", "Total"
FROM "TransactionDetails"
WHERE "TransactionId" = $1
ORDER BY "TransactionDetailId"
"#;

const LIVE_IDS: &str = r#"SELECT "TransactionId" FROM "Transactions" WHERE "IsDeleted" = FALSE"#;

const SOFT_DELETED: &str = r#"
SELECT "TransactionId", "ModifiedDate" FROM "Transactions"
WHERE "IsDeleted" = TRUE AND "ModifiedDate" > $1
"#;

const HISTORY_SPAN: &str = r#"
SELECT MIN("TransactionDate") AS "MinDate", MAX("TransactionDate") AS "MaxDate",
       COUNT(*) AS "Total"
FROM "Transactions"
WHERE "IsDeleted" = FALSE
"#;

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    #[sqlx(rename = "TransactionId")]
    pub transaction_id: i32,
    #[sqlx(rename = "CustomerId")]
    pub customer_id: Option<i32>,
    #[sqlx(rename = "CustomerName")]
    pub customer_name: Option<String>,
    #[sqlx(rename = "TotalAmount")]
    pub total_amount: Decimal,
    #[sqlx(rename = "PaidAmount")]
    pub paid_amount: Decimal,
    #[sqlx(rename = "TransactionDate")]
    pub transaction_date: DateTime<Utc>,
    #[sqlx(rename = "TransactionType")]
    pub transaction_type: i32,
    #[sqlx(rename = "Status")]
    pub status: i32,
    #[sqlx(rename = "PaymentMethod")]
    pub payment_method: Option<String>,
    #[sqlx(rename = "CashierId")]
    pub cashier_id: Option<i32>,
    #[sqlx(rename = "CashierName")]
    pub cashier_name: Option<String>,
    #[sqlx(rename = "CashierRole")]
    pub cashier_role: Option<String>,
    #[sqlx(rename = "CreatedDate")]
    pub created_date: DateTime<Utc>,
    #[sqlx(rename = "ModifiedDate")]
    pub modified_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionDetailRow {
    #[sqlx(rename = "TransactionDetailId")]
    pub transaction_detail_id: i32,
    #[sqlx(rename = "TransactionId")]
    pub transaction_id: i32,
    #[sqlx(rename = "ProductId")]
    pub product_id: i32,
    #[sqlx(rename = "Quantity")]
    pub quantity: Decimal,
    #[sqlx(rename = "UnitPrice")]
    pub unit_price: Decimal,
    #[sqlx(rename = "PurchasePrice")]
    pub purchase_price: Decimal,
    #[sqlx(rename = "Discount")]
    pub discount: Decimal,
    #[sqlx(rename = "Total")]
    pub total: Decimal,
}

impl TransactionDetailRow {
    #[must_use]
    pub fn into_doc(self) -> TransactionDetailDoc {
        TransactionDetailDoc {
            transaction_detail_id: i64::from(self.transaction_detail_id),
            transaction_id: i64::from(self.transaction_id),
            product_id: i64::from(self.product_id),
            quantity: self.quantity,
            unit_price: self.unit_price,
            purchase_price: self.purchase_price,
            discount: self.discount,
            total: self.total,
        }
    }
}

impl TransactionRow {
    /// Integer codes become their string names; unmapped codes survive as
    /// `Unknown(<n>)` instead of poisoning the row.
    #[must_use]
    pub fn into_doc(
        self,
        transaction_details: Vec<TransactionDetailDoc>,
        synced_at: DateTime<Utc>,
    ) -> TransactionDoc {
        TransactionDoc {
            id: i64::from(self.transaction_id),
            transaction_id: i64::from(self.transaction_id),
            customer_id: self.customer_id.map(i64::from),
            customer_name: self.customer_name.unwrap_or_default(),
            total_amount: self.total_amount,
            paid_amount: self.paid_amount,
            transaction_date: self.transaction_date,
            transaction_type: TransactionType::from_code(self.transaction_type).to_string(),
            status: TransactionStatus::from_code(self.status).to_string(),
            payment_method: self.payment_method.unwrap_or_default(),
            cashier_id: self.cashier_id.map(i64::from),
            cashier_name: self.cashier_name.unwrap_or_default(),
            cashier_role: self.cashier_role.unwrap_or_default(),
            created_date: self.created_date,
            modified_date: self.modified_date,
            transaction_details,
            details_removed_for_size: false,
            original_detail_count: None,
            synced_at,
        }
    }
}

/// Serialize, enforcing the per-document ceiling. Oversized parents are
/// written without their line items plus the repair flag.
pub(crate) fn guarded_document(
    mut doc: TransactionDoc,
    limit: usize,
) -> Result<(Document, bool), bson::ser::Error> {
    let bytes = bson::to_vec(&doc)?;
    if bytes.len() <= limit {
        return Ok((bson::to_document(&doc)?, false));
    }

    let original_count = i64::try_from(doc.transaction_details.len()).unwrap_or(i64::MAX);
    doc.transaction_details.clear();
    doc.details_removed_for_size = true;
    doc.original_detail_count = Some(original_count);
    Ok((bson::to_document(&doc)?, true))
}

pub struct TransactionExtractor {
    pool: PgPool,
}

impl TransactionExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All line items of one transaction, in detail-id order.
    async fn fetch_children(
        &self,
        transaction_id: i32,
    ) -> Result<Vec<TransactionDetailDoc>, SyncError> {
        let rows = sqlx::query_as::<_, TransactionDetailRow>(CHILDREN)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TransactionDetailRow::into_doc).collect())
    }

    /// Shared row assembly for the incremental and backfill paths. Both
    /// queries alias their ordering column as `Marker`.
    async fn assemble_page(&self, rows: Vec<PgRow>) -> Result<ChangedPage, SyncError> {
        let synced_at = Utc::now();
        let mut page = PageBuilder::new(EntityKind::Transaction);
        for raw in rows {
            let id: i32 = raw.try_get("TransactionId")?;
            let marker: DateTime<Utc> = raw.try_get("Marker")?;
            page.fetched(marker, i64::from(id));

            let row = match TransactionRow::from_row(&raw) {
                Ok(row) => row,
                Err(error) => {
                    page.skip(i64::from(id), &error);
                    continue;
                }
            };

            let children = self.fetch_children(id).await?;
            let child_count = children.len();
            let doc = row.into_doc(children, synced_at);
            match guarded_document(doc, MAX_DOCUMENT_BYTES) {
                Ok((document, trimmed)) => {
                    if trimmed {
                        warn!(
                            transaction_id = id,
                            child_count, "transaction exceeded the document size limit; line items removed"
                        );
                    }
                    page.push(ChangedDoc {
                        id: i64::from(id),
                        marker,
                        document,
                    });
                }
                Err(error) => page.skip(i64::from(id), &error),
            }
        }
        Ok(page.finish())
    }
}

#[async_trait]
impl EntityExtractor for TransactionExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Transaction
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
        self.assemble_page(rows).await
    }

    async fn live_ids(&self) -> Result<HashSet<i64>, SyncError> {
        let ids: Vec<i32> = sqlx::query_scalar(LIVE_IDS).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().map(i64::from).collect())
    }

    async fn soft_deleted(&self, since: DateTime<Utc>) -> Result<Vec<Tombstone>, SyncError> {
        let rows = sqlx::query(SOFT_DELETED)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        let mut tombstones = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.try_get("TransactionId")?;
            let marker: DateTime<Utc> = row.try_get("ModifiedDate")?;
            tombstones.push(Tombstone {
                id: i64::from(id),
                marker,
            });
        }
        Ok(tombstones)
    }
}

#[async_trait]
impl BulkSource for TransactionExtractor {
    async fn history_span(&self) -> Result<Option<HistorySpan>, SyncError> {
        let row = sqlx::query(HISTORY_SPAN).fetch_one(&self.pool).await?;
        let min_date: Option<DateTime<Utc>> = row.try_get("MinDate")?;
        let max_date: Option<DateTime<Utc>> = row.try_get("MaxDate")?;
        let total_count: i64 = row.try_get("Total")?;

        match (min_date, max_date) {
            (Some(min_date), Some(max_date)) => Ok(Some(HistorySpan {
                min_date,
                max_date,
                total_count,
            })),
            _ => Ok(None),
        }
    }

    async fn window_page(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        cursor: PageCursor,
        batch: usize,
    ) -> Result<ChangedPage, SyncError> {
        let rows = sqlx::query(WINDOW_PAGE)
            .bind(window_start)
            .bind(window_end)
            .bind(cursor.since)
            .bind(cursor.after_id)
            .bind(i64::try_from(batch).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        self.assemble_page(rows).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample_row() -> TransactionRow {
        TransactionRow {
            transaction_id: 42,
            customer_id: Some(9),
            customer_name: Some("Corner Cafe".to_string()),
            total_amount: Decimal::new(10_000, 2),
            paid_amount: Decimal::new(10_000, 2),
            transaction_date: Utc.with_ymd_and_hms(2024, 6, 1, 11, 55, 0).unwrap(),
            transaction_type: 0,
            status: 1,
            payment_method: None,
            cashier_id: Some(1),
            cashier_name: Some("Ada".to_string()),
            cashier_role: None,
            created_date: Utc.with_ymd_and_hms(2024, 6, 1, 11, 55, 0).unwrap(),
            modified_date: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn sample_detail(id: i32) -> TransactionDetailDoc {
        TransactionDetailRow {
            transaction_detail_id: id,
            transaction_id: 42,
            product_id: 7,
            quantity: Decimal::new(2, 0),
            unit_price: Decimal::new(2500, 2),
            purchase_price: Decimal::new(1200, 2),
            discount: Decimal::ZERO,
            total: Decimal::new(5000, 2),
        }
        .into_doc()
    }

    #[test]
    fn projection_maps_enum_codes_to_names() {
        let synced_at = Utc::now();
        let doc = sample_row().into_doc(vec![sample_detail(1), sample_detail(2)], synced_at);

        assert_eq!(doc.id, 42);
        assert_eq!(doc.transaction_type, "Sale");
        assert_eq!(doc.status, "Completed");
        assert_eq!(doc.transaction_details.len(), 2);
        assert_eq!(doc.payment_method, "");
        assert_eq!(doc.cashier_role, "");
    }

    #[test]
    fn unmapped_enum_code_becomes_unknown_not_an_error() {
        let mut row = sample_row();
        row.transaction_type = 99;
        let doc = row.into_doc(Vec::new(), Utc::now());
        assert_eq!(doc.transaction_type, "Unknown(99)");
    }

    #[test]
    fn size_guard_passes_small_documents_untouched() {
        let doc = sample_row().into_doc(vec![sample_detail(1)], Utc::now());
        let (document, trimmed) = guarded_document(doc, MAX_DOCUMENT_BYTES).unwrap();
        assert!(!trimmed);
        assert!(!document.contains_key("detailsRemovedForSize"));
        assert_eq!(document.get_array("transactionDetails").unwrap().len(), 1);
    }

    #[test]
    fn size_guard_strips_details_and_flags_the_parent() {
        let details: Vec<_> = (0..50).map(sample_detail).collect();
        let doc = sample_row().into_doc(details, Utc::now());

        // A limit below the assembled size forces the trim path.
        let (document, trimmed) = guarded_document(doc, 512).unwrap();
        assert!(trimmed);
        assert!(document.get_array("transactionDetails").unwrap().is_empty());
        assert!(document.get_bool("detailsRemovedForSize").unwrap());
        assert_eq!(document.get_i64("originalDetailCount").unwrap(), 50);
    }

    #[test]
    fn trimmed_parent_fits_the_real_limit() {
        let details: Vec<_> = (0..200).map(sample_detail).collect();
        let doc = sample_row().into_doc(details, Utc::now());
        let (document, trimmed) = guarded_document(doc, 4096).unwrap();
        assert!(trimmed);
        let bytes = bson::to_vec(&document).unwrap();
        assert!(bytes.len() <= 4096, "trimmed parent is {} bytes", bytes.len());
    }
}
