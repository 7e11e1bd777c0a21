//! Per-device-per-entity cursor state and the entity enumeration.

use chrono::{DateTime, Utc};

/// Payload sentinel: the transaction history backfill has covered the full
/// history, so incremental passes may use an aggressively narrow window.
pub const BULK_COMPLETED: &str = "COMPLETED";

/// Payload prefix recording the last calendar day the backfill processed,
/// e.g. `ProcessedDate:2024-05-13`. Used to resume an interrupted backfill.
pub const PROCESSED_DATE_PREFIX: &str = "ProcessedDate:";

/// The seven replicated entity streams.
///
/// Each entity is an independent stream with its own checkpoint; the
/// canonical string form (also the target collection name) is the
/// `EntityType` value persisted in checkpoints and sync logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    Product,
    Customer,
    BusinessSetting,
    Employee,
    Expense,
    Transaction,
}

impl EntityKind {
    /// All entities in the order passes run within a tick.
    pub const ALL: [Self; 7] = [
        Self::Category,
        Self::Product,
        Self::Customer,
        Self::BusinessSetting,
        Self::Employee,
        Self::Expense,
        Self::Transaction,
    ];

    /// Target collection name; doubles as the checkpoint `EntityType` value.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Product => "products",
            Self::Customer => "customers",
            Self::BusinessSetting => "business_settings",
            Self::Employee => "employees",
            Self::Expense => "expenses",
            Self::Transaction => "transactions",
        }
    }

    /// Inverse of [`EntityKind::collection`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.collection() == name)
    }

    /// Whether the extractor pages through the table. Categories and
    /// business settings are small enough for a single snapshot per pass.
    #[must_use]
    pub fn batched(self) -> bool {
        !matches!(self, Self::Category | Self::BusinessSetting)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// Durable cursor state for one `(device, entity)` pair.
///
/// `last_sync_time` is the largest modification marker whose row has been
/// acknowledged written; `last_record_id` disambiguates within a run of rows
/// sharing that marker. `payload` is opaque free-form state owned by the
/// bulk backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub device_id: String,
    pub entity: EntityKind,
    pub last_sync_time: DateTime<Utc>,
    pub last_record_id: Option<i64>,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether the backfill recorded full-history coverage on this pair.
    #[must_use]
    pub fn bulk_completed(&self) -> bool {
        self.payload.as_deref() == Some(BULK_COMPLETED)
    }

    /// The resume day recorded by an interrupted backfill, if any.
    #[must_use]
    pub fn processed_date(&self) -> Option<chrono::NaiveDate> {
        let raw = self.payload.as_deref()?.strip_prefix(PROCESSED_DATE_PREFIX)?;
        raw.parse().ok()
    }
}
