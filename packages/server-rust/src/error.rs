//! Typed error seams of the sync server.
//!
//! The engine branches on the kind of failure (transient external vs poison
//! row vs checkpoint-store loss), so the seams carry a real enum rather than
//! `anyhow`. The binary's bootstrap path still uses `anyhow` for one-shot
//! context.

use thiserror::Error;

/// Failure surfaced by the source, the target, or the engine itself.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Relational source query failed (connection, SQL, decode).
    #[error("source query failed: {0}")]
    Source(#[from] sqlx::Error),

    /// Document store operation failed.
    #[error("target operation failed: {0}")]
    Target(#[from] mongodb::error::Error),

    /// Checkpoint store read/write failed; the pass must abort.
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[source] sqlx::Error),

    /// A bounded call overran its deadline.
    #[error("{operation} exceeded the {seconds}s deadline")]
    Deadline { operation: String, seconds: u64 },

    /// A single source row could not be mapped into a target document.
    /// Carries the primary key so the row can be found and repaired.
    #[error("row {id} could not be mapped: {reason}")]
    Row { id: i64, reason: String },

    /// BSON encoding of an assembled document failed.
    #[error("document encoding failed: {0}")]
    Encode(#[from] bson::ser::Error),

    /// Required configuration is absent or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether a retry on the next tick is expected to succeed without
    /// operator intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::Target(_) | Self::Checkpoint(_) | Self::Deadline { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_message_names_the_operation() {
        let err = SyncError::Deadline {
            operation: "bulk upsert into products".to_string(),
            seconds: 600,
        };
        assert_eq!(
            err.to_string(),
            "bulk upsert into products exceeded the 600s deadline"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn row_errors_are_not_transient() {
        let err = SyncError::Row {
            id: 42,
            reason: "negative quantity".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn config_errors_are_not_transient() {
        assert!(!SyncError::Config("source URL missing".to_string()).is_transient());
    }
}
