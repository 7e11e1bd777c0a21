//! Employee extractor with embedded salary transactions.
//!
//! The change filter is `CreatedAt > since`, matching the source's observed
//! behaviour: edits to an existing employee are never replicated after the
//! first pass. This is a documented limitation (see DESIGN.md) kept
//! deliberately until the upstream filter is clarified; salary transactions
//! are embedded unconditionally, so they only refresh when their employee
//! row is re-emitted.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};
use tillsync_core::{
    ChangedDoc, ChangedPage, EmployeeDoc, EntityKind, PageCursor, SalaryTransactionDoc,
};

use super::PageBuilder;
use crate::error::SyncError;
use crate::traits::EntityExtractor;

const CHANGED_PAGE: &str = r#"
SELECT "EmployeeId", "Username", "PasswordHash", "FirstName", "LastName",
       "Role", "IsActive", "CreatedAt", "LastLogin", "MonthlySalary", "CurrentBalance"
FROM "Employees"
WHERE "IsActive" = TRUE
  AND ("CreatedAt" > $1
   OR ("CreatedAt" = $1 AND "EmployeeId" > $2))
ORDER BY "CreatedAt", "EmployeeId"
LIMIT $3
"#;

const CHILDREN: &str = r#"
SELECT "Id", "EmployeeId", "Amount", "TransactionType", "TransactionDate", "Notes"
FROM "EmployeeSalaryTransactions"
WHERE "EmployeeId" = $1
ORDER BY "TransactionDate", "Id"
"#;

const LIVE_IDS: &str = r#"SELECT "EmployeeId" FROM "Employees" WHERE "IsActive" = TRUE"#;

#[derive(Debug, Clone, FromRow)]
pub struct EmployeeRow {
    #[sqlx(rename = "EmployeeId")]
    pub employee_id: i32,
    #[sqlx(rename = "Username")]
    pub username: String,
    #[sqlx(rename = "PasswordHash")]
    pub password_hash: Option<String>,
    #[sqlx(rename = "FirstName")]
    pub first_name: Option<String>,
    #[sqlx(rename = "LastName")]
    pub last_name: Option<String>,
    #[sqlx(rename = "Role")]
    pub role: Option<String>,
    #[sqlx(rename = "IsActive")]
    pub is_active: bool,
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "LastLogin")]
    pub last_login: Option<DateTime<Utc>>,
    #[sqlx(rename = "MonthlySalary")]
    pub monthly_salary: Decimal,
    #[sqlx(rename = "CurrentBalance")]
    pub current_balance: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct SalaryTransactionRow {
    #[sqlx(rename = "Id")]
    pub id: i32,
    #[sqlx(rename = "EmployeeId")]
    pub employee_id: i32,
    #[sqlx(rename = "Amount")]
    pub amount: Decimal,
    #[sqlx(rename = "TransactionType")]
    pub transaction_type: Option<String>,
    #[sqlx(rename = "TransactionDate")]
    pub transaction_date: DateTime<Utc>,
    #[sqlx(rename = "Notes")]
    pub notes: Option<String>,
}

impl SalaryTransactionRow {
    #[must_use]
    pub fn into_doc(self) -> SalaryTransactionDoc {
        SalaryTransactionDoc {
            id: i64::from(self.id),
            employee_id: i64::from(self.employee_id),
            amount: self.amount,
            transaction_type: self.transaction_type.unwrap_or_default(),
            transaction_date: self.transaction_date,
            notes: self.notes.unwrap_or_default(),
        }
    }
}

impl EmployeeRow {
    #[must_use]
    pub fn into_doc(
        self,
        salary_transactions: Vec<SalaryTransactionDoc>,
        synced_at: DateTime<Utc>,
    ) -> EmployeeDoc {
        EmployeeDoc {
            id: i64::from(self.employee_id),
            employee_id: i64::from(self.employee_id),
            username: self.username,
            password_hash: self.password_hash.unwrap_or_default(),
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            role: self.role.unwrap_or_default(),
            is_active: self.is_active,
            created_at: self.created_at,
            last_login: self.last_login,
            monthly_salary: self.monthly_salary,
            current_balance: self.current_balance,
            salary_transactions,
            synced_at,
        }
    }
}

pub struct EmployeeExtractor {
    pool: PgPool,
}

impl EmployeeExtractor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All salary transactions of one employee, oldest first.
    async fn fetch_children(
        &self,
        employee_id: i32,
    ) -> Result<Vec<SalaryTransactionDoc>, SyncError> {
        let rows = sqlx::query_as::<_, SalaryTransactionRow>(CHILDREN)
            .bind(employee_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(SalaryTransactionRow::into_doc).collect())
    }
}

#[async_trait]
impl EntityExtractor for EmployeeExtractor {
    fn entity(&self) -> EntityKind {
        EntityKind::Employee
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
        let mut page = PageBuilder::new(EntityKind::Employee);
        for raw in rows {
            let id: i32 = raw.try_get("EmployeeId")?;
            let marker: DateTime<Utc> = raw.try_get("CreatedAt")?;
            page.fetched(marker, i64::from(id));

            let row = match EmployeeRow::from_row(&raw) {
                Ok(row) => row,
                Err(error) => {
                    page.skip(i64::from(id), &error);
                    continue;
                }
            };

            // Children are embedded in the same write as the parent.
            let children = self.fetch_children(id).await?;
            let doc = row.into_doc(children, synced_at);
            match bson::to_document(&doc) {
                Ok(document) => page.push(ChangedDoc {
                    id: doc.id,
                    marker,
                    document,
                }),
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
