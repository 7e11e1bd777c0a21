//! Target document shapes, one struct per replicated entity.
//!
//! Shared contract across all entities:
//! - `_id` is the source primary key as an `i64`, and the document also
//!   carries the same value under a named key field (`productId`, ...) for
//!   caller convenience.
//! - `syncedAt` records when the document was produced for writing.
//! - Money and quantity fields are exact decimals (`Decimal128` in BSON).
//! - Timestamps are UTC BSON datetimes; nullable timestamps serialize as an
//!   explicit BSON null; nullable strings collapse to `""`; nullable foreign
//!   keys stay typed nulls.
//!
//! Documents are replaced in full on every write; there are no partial
//! updates, so each struct is the complete wire shape.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::bson_serde;

fn is_false(value: &bool) -> bool {
    !*value
}

/// A product category. Full snapshot each pass; embeds nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

/// A sellable product. Carries its category's name by value so readers do
/// not need a second lookup; the category collection stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub product_id: i64,
    pub barcode: String,
    pub name: String,
    pub description: String,
    pub category_id: Option<i64>,
    pub category_name: String,
    #[serde(with = "bson_serde::decimal128")]
    pub purchase_price: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub sale_price: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub current_stock: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub minimum_stock: Decimal,
    pub supplier_id: Option<i64>,
    pub is_active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_serde::datetime_option")]
    pub updated_at: Option<DateTime<Utc>>,
    pub speed: String,
    pub image_path: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub is_active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_serde::datetime_option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(with = "bson_serde::decimal128")]
    pub balance: Decimal,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

/// A key/value row from the business settings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSettingDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub setting_id: i64,
    pub key: String,
    pub value: String,
    pub description: String,
    pub group: String,
    pub data_type: String,
    pub is_system: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

/// A salary movement embedded inside its employee document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryTransactionDoc {
    pub id: i64,
    pub employee_id: i64,
    #[serde(with = "bson_serde::decimal128")]
    pub amount: Decimal,
    pub transaction_type: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub transaction_date: DateTime<Utc>,
    pub notes: String,
}

/// An employee with all of their salary transactions embedded, so the
/// parent is never observed without its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub employee_id: i64,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_serde::datetime_option")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(with = "bson_serde::decimal128")]
    pub monthly_salary: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub current_balance: Decimal,
    pub salary_transactions: Vec<SalaryTransactionDoc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub expense_id: i64,
    pub reason: String,
    #[serde(with = "bson_serde::decimal128")]
    pub amount: Decimal,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    pub notes: String,
    pub category: String,
    pub is_recurring: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_serde::datetime_option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

/// A line item embedded inside its transaction document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetailDoc {
    pub transaction_detail_id: i64,
    pub transaction_id: i64,
    pub product_id: i64,
    #[serde(with = "bson_serde::decimal128")]
    pub quantity: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub unit_price: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub purchase_price: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub discount: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub total: Decimal,
}

/// A sales transaction with all of its line items embedded.
///
/// `transaction_type` and `status` carry the string forms of the source's
/// integer codes (see [`crate::enums`]). Customer and cashier are referenced
/// by id plus a denormalized display name; the cycle back to the customer
/// document is never materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub transaction_id: i64,
    pub customer_id: Option<i64>,
    pub customer_name: String,
    #[serde(with = "bson_serde::decimal128")]
    pub total_amount: Decimal,
    #[serde(with = "bson_serde::decimal128")]
    pub paid_amount: Decimal,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub transaction_date: DateTime<Utc>,
    pub transaction_type: String,
    pub status: String,
    pub payment_method: String,
    pub cashier_id: Option<i64>,
    pub cashier_name: String,
    pub cashier_role: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub modified_date: DateTime<Utc>,
    pub transaction_details: Vec<TransactionDetailDoc>,
    /// Set when the assembled document exceeded the per-document size limit
    /// and was written without its line items; `original_detail_count` keeps
    /// the pre-trim count so a repair pass can find these parents.
    #[serde(default, skip_serializing_if = "is_false")]
    pub details_removed_for_size: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_detail_count: Option<i64>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub synced_at: DateTime<Utc>,
}

/// Outcome record appended to `sync_logs` after every pass. Inserted, never
/// upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogDoc {
    pub device_id: String,
    pub entity_type: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub last_sync_time: DateTime<Utc>,
    pub is_success: bool,
    pub records_synced: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
