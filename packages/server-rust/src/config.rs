//! Service configuration: CLI flags with environment fallback.

use std::time::Duration;

use clap::Parser;
use tillsync_core::EntityKind;

use crate::error::SyncError;

/// Runtime configuration for the sync server.
///
/// Every flag can also be set through its `TILLSYNC_*` environment
/// variable. Connection strings have no defaults; `validate` rejects a
/// configuration without them before any component is built.
#[derive(Debug, Clone, Parser)]
#[command(name = "tillsync-server", version, about = "One-way replication from the till database into the document store")]
pub struct ServiceConfig {
    /// PostgreSQL connection string for the authoritative source.
    #[arg(long, env = "TILLSYNC_SOURCE_URL")]
    pub source_url: Option<String>,

    /// MongoDB connection string for the target document store.
    #[arg(long, env = "TILLSYNC_TARGET_URL")]
    pub target_url: Option<String>,

    /// Target database name.
    #[arg(long, env = "TILLSYNC_TARGET_DB", default_value = "tillsync")]
    pub target_database: String,

    /// Identifier persisted in checkpoints and sync logs. Must be stable
    /// across restarts and unique per replica.
    #[arg(long, env = "TILLSYNC_DEVICE_ID", default_value = "primary-till")]
    pub device_id: String,

    /// Seconds between scheduler ticks.
    #[arg(long, env = "TILLSYNC_INTERVAL_SECONDS", default_value_t = 120)]
    pub interval_seconds: u64,

    /// First-run window for the transaction stream, in days.
    #[arg(long, env = "TILLSYNC_TRANSACTION_WINDOW_DAYS", default_value_t = 3)]
    pub transaction_window_days: i64,

    /// First-run window for every other stream, in days.
    #[arg(long, env = "TILLSYNC_DEFAULT_WINDOW_DAYS", default_value_t = 30)]
    pub default_window_days: i64,

    /// Hard floor: no pass ever reads further back than this, in days.
    #[arg(long, env = "TILLSYNC_REPLAY_HORIZON_DAYS", default_value_t = 90)]
    pub replay_horizon_days: i64,

    #[arg(long, env = "TILLSYNC_TRANSACTION_BATCH_SIZE", default_value_t = 250)]
    pub transaction_batch_size: usize,

    #[arg(long, env = "TILLSYNC_PRODUCT_BATCH_SIZE", default_value_t = 500)]
    pub product_batch_size: usize,

    #[arg(long, env = "TILLSYNC_CUSTOMER_BATCH_SIZE", default_value_t = 500)]
    pub customer_batch_size: usize,

    #[arg(long, env = "TILLSYNC_EXPENSE_BATCH_SIZE", default_value_t = 500)]
    pub expense_batch_size: usize,

    #[arg(long, env = "TILLSYNC_EMPLOYEE_BATCH_SIZE", default_value_t = 200)]
    pub employee_batch_size: usize,

    /// Throttle between consecutive batches of one pass, in milliseconds.
    #[arg(long, env = "TILLSYNC_INTER_BATCH_DELAY_MS", default_value_t = 200)]
    pub inter_batch_delay_ms: u64,

    /// Deadline for one bulk write against the target, in seconds.
    #[arg(long, env = "TILLSYNC_SOCKET_TIMEOUT_SECONDS", default_value_t = 600)]
    pub socket_timeout_seconds: u64,

    /// MongoDB server selection timeout, in seconds.
    #[arg(long, env = "TILLSYNC_SERVER_SELECTION_TIMEOUT_SECONDS", default_value_t = 30)]
    pub server_selection_timeout_seconds: u64,

    /// Deadline for one source query, in seconds.
    #[arg(long, env = "TILLSYNC_SOURCE_QUERY_TIMEOUT_SECONDS", default_value_t = 300)]
    pub source_query_timeout_seconds: u64,

    /// HTTP bind host for the status and pull API.
    #[arg(long, env = "TILLSYNC_HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    /// HTTP bind port for the status and pull API.
    #[arg(long, env = "TILLSYNC_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Enable the periodic sync on startup instead of waiting for the
    /// operator toggle.
    #[arg(long, env = "TILLSYNC_AUTO_SYNC", default_value_t = false)]
    pub auto_sync: bool,

    /// Run the transaction history backfill before starting the scheduler.
    /// Resumes from the recorded day if a previous run was interrupted.
    #[arg(long, env = "TILLSYNC_BULK_BACKFILL", default_value_t = false)]
    pub bulk_backfill: bool,
}

impl ServiceConfig {
    /// Reject configurations that cannot reach both stores.
    ///
    /// # Errors
    /// `SyncError::Config` naming the missing key.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source_url.as_deref().is_none_or(str::is_empty) {
            return Err(SyncError::Config(
                "source connection string is missing (--source-url / TILLSYNC_SOURCE_URL)"
                    .to_string(),
            ));
        }
        if self.target_url.as_deref().is_none_or(str::is_empty) {
            return Err(SyncError::Config(
                "target connection string is missing (--target-url / TILLSYNC_TARGET_URL)"
                    .to_string(),
            ));
        }
        if self.interval_seconds == 0 {
            return Err(SyncError::Config("interval must be at least 1 second".to_string()));
        }
        Ok(())
    }

    /// Per-entity page/batch size. Snapshot entities are unbatched and
    /// return `None`.
    #[must_use]
    pub fn batch_size(&self, entity: EntityKind) -> Option<usize> {
        match entity {
            EntityKind::Category | EntityKind::BusinessSetting => None,
            EntityKind::Product => Some(self.product_batch_size),
            EntityKind::Customer => Some(self.customer_batch_size),
            EntityKind::Employee => Some(self.employee_batch_size),
            EntityKind::Expense => Some(self.expense_batch_size),
            EntityKind::Transaction => Some(self.transaction_batch_size),
        }
    }

    /// First-run window for an entity with no checkpoint.
    #[must_use]
    pub fn default_window(&self, entity: EntityKind) -> chrono::Duration {
        let days = if entity == EntityKind::Transaction {
            self.transaction_window_days
        } else {
            self.default_window_days
        };
        chrono::Duration::days(days)
    }

    /// Oldest point any window may open at.
    #[must_use]
    pub fn replay_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.replay_horizon_days)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    #[must_use]
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    #[must_use]
    pub fn bulk_deadline(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_seconds)
    }

    #[must_use]
    pub fn source_deadline(&self) -> Duration {
        Duration::from_secs(self.source_query_timeout_seconds)
    }

    /// A configuration with defaults and no connection strings; tests fill
    /// in what they need.
    #[must_use]
    pub fn for_tests() -> Self {
        Self::parse_from(["tillsync-server"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_service_contract() {
        let config = ServiceConfig::for_tests();
        assert_eq!(config.interval_seconds, 120);
        assert_eq!(config.transaction_window_days, 3);
        assert_eq!(config.default_window_days, 30);
        assert_eq!(config.socket_timeout_seconds, 600);
        assert_eq!(config.server_selection_timeout_seconds, 30);
        assert_eq!(config.device_id, "primary-till");
    }

    #[test]
    fn validate_requires_both_connection_strings() {
        let mut config = ServiceConfig::for_tests();
        assert!(config.validate().is_err());

        config.source_url = Some("postgres://till@localhost/till".to_string());
        assert!(config.validate().is_err());

        config.target_url = Some("mongodb://localhost:27017".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_strings() {
        let mut config = ServiceConfig::for_tests();
        config.source_url = Some(String::new());
        config.target_url = Some("mongodb://localhost:27017".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn snapshot_entities_have_no_batch_size() {
        let config = ServiceConfig::for_tests();
        assert_eq!(config.batch_size(EntityKind::Category), None);
        assert_eq!(config.batch_size(EntityKind::BusinessSetting), None);
        assert_eq!(config.batch_size(EntityKind::Transaction), Some(250));
        assert_eq!(config.batch_size(EntityKind::Product), Some(500));
    }

    #[test]
    fn transaction_window_is_narrower_than_default() {
        let config = ServiceConfig::for_tests();
        assert!(
            config.default_window(EntityKind::Transaction)
                < config.default_window(EntityKind::Product)
        );
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServiceConfig::parse_from([
            "tillsync-server",
            "--interval-seconds",
            "30",
            "--transaction-batch-size",
            "100",
        ]);
        assert_eq!(config.interval_seconds, 30);
        assert_eq!(config.batch_size(EntityKind::Transaction), Some(100));
    }
}
