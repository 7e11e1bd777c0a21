//! Per-pass outcome summary.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::checkpoint::EntityKind;
use crate::documents::SyncLogDoc;

/// Outcome of one pass of one entity, reported to the scheduler, the log
/// ring, and the `sync_logs` collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub device_id: String,
    pub entity: EntityKind,
    pub records_synced: u64,
    pub records_deleted: u64,
    /// Rows skipped as malformed plus per-document write failures.
    pub records_skipped: u64,
    /// Watermark after the pass; equals the pre-pass watermark when no row
    /// advanced it.
    pub last_sync_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncResult {
    /// Project this result into the `sync_logs` document shape.
    #[must_use]
    pub fn to_log_doc(&self) -> SyncLogDoc {
        SyncLogDoc {
            device_id: self.device_id.clone(),
            entity_type: self.entity.collection().to_string(),
            last_sync_time: self.last_sync_time,
            is_success: self.success,
            records_synced: i64::try_from(self.records_synced).unwrap_or(i64::MAX),
            error_message: self.error.clone(),
        }
    }

    /// One line for the operator log ring, prefixed per severity.
    #[must_use]
    pub fn ring_line(&self) -> String {
        if self.success {
            format!(
                "SUCCESS: {} synced {} records ({} deleted, {} skipped) in {:?}",
                self.entity, self.records_synced, self.records_deleted, self.records_skipped,
                self.elapsed
            )
        } else {
            format!(
                "ERROR: {} pass failed after {:?}: {}",
                self.entity,
                self.elapsed,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample(success: bool) -> SyncResult {
        SyncResult {
            device_id: "till-1".to_string(),
            entity: EntityKind::Product,
            records_synced: 12,
            records_deleted: 2,
            records_skipped: 1,
            last_sync_time: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            elapsed: Duration::from_millis(420),
            success,
            error: (!success).then(|| "source query failed".to_string()),
        }
    }

    #[test]
    fn log_doc_mirrors_the_result() {
        let doc = sample(true).to_log_doc();
        assert_eq!(doc.entity_type, "products");
        assert_eq!(doc.records_synced, 12);
        assert!(doc.is_success);
        assert!(doc.error_message.is_none());
    }

    #[test]
    fn ring_line_prefixes_by_severity() {
        assert!(sample(true).ring_line().starts_with("SUCCESS: products"));
        let failed = sample(false).ring_line();
        assert!(failed.starts_with("ERROR: products"));
        assert!(failed.contains("source query failed"));
    }
}
