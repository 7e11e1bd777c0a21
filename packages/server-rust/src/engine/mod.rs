//! The sync engine: orchestration of incremental passes and the bulk
//! backfill over the extractor/loader/checkpoint seams.

mod backfill;
mod pass;

pub use backfill::{BackfillSummary, BACKFILL_WINDOW_DAYS};

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tillsync_core::{EndpointStatus, ServerStatus, SyncResult};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::logring::LogRing;
use crate::source::SourcePool;
use crate::status::StatusPublisher;
use crate::traits::{BulkSource, CheckpointStore, EntityExtractor, SyncRunner, TargetStore};

/// Orchestrates passes for one device over a set of registered entities.
///
/// Entities run sequentially within a cycle to keep source contention
/// bounded; the scheduler guarantees at most one cycle is in flight.
pub struct SyncEngine {
    device_id: String,
    config: Arc<ServiceConfig>,
    checkpoints: Arc<dyn CheckpointStore>,
    target: Arc<dyn TargetStore>,
    extractors: Vec<Arc<dyn EntityExtractor>>,
    bulk: Option<Arc<dyn BulkSource>>,
    source: Option<SourcePool>,
    status: StatusPublisher,
    logs: Arc<LogRing>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        config: Arc<ServiceConfig>,
        checkpoints: Arc<dyn CheckpointStore>,
        target: Arc<dyn TargetStore>,
        status: StatusPublisher,
        logs: Arc<LogRing>,
    ) -> Self {
        Self {
            device_id: config.device_id.clone(),
            config,
            checkpoints,
            target,
            extractors: Vec::new(),
            bulk: None,
            source: None,
            status,
            logs,
            shutdown: None,
        }
    }

    /// Register an entity stream. Passes run in registration order.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Register the full-history source for the transaction backfill.
    #[must_use]
    pub fn with_bulk_source(mut self, bulk: Arc<dyn BulkSource>) -> Self {
        self.bulk = Some(bulk);
        self
    }

    /// Attach the source pool so the startup probe can ping it.
    #[must_use]
    pub fn with_source_pool(mut self, source: SourcePool) -> Self {
        self.source = Some(source);
        self
    }

    /// Observe the process shutdown signal between entities and pages.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn extractors(&self) -> &[Arc<dyn EntityExtractor>] {
        &self.extractors
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

#[async_trait]
impl SyncRunner for SyncEngine {
    async fn run_cycle(&self) -> Vec<SyncResult> {
        self.status.update(|status| {
            status.is_syncing = true;
            status.server_status = ServerStatus::Running;
        });

        let mut results = Vec::with_capacity(self.extractors.len());
        for extractor in &self.extractors {
            if self.shutdown_requested() {
                info!("shutdown requested; remaining entities deferred to the next run");
                break;
            }
            let result = self.run_entity_pass(extractor.as_ref()).await;
            counter!(
                "tillsync_passes_total",
                "entity" => result.entity.collection(),
                "outcome" => if result.success { "success" } else { "error" }
            )
            .increment(1);
            counter!("tillsync_records_synced_total", "entity" => result.entity.collection())
                .increment(result.records_synced);
            results.push(result);
        }

        self.status.update(|status| status.is_syncing = false);
        results
    }

    async fn probe(&self) {
        let connection_status = match &self.source {
            Some(pool) => match pool.ping().await {
                Ok(()) => EndpointStatus::Connected,
                Err(error) => {
                    warn!(%error, "source unreachable during startup probe");
                    self.logs.push(format!("ERROR: source unreachable: {error}"));
                    EndpointStatus::Error
                }
            },
            None => EndpointStatus::Connected,
        };

        let target_status = match self.target.ping().await {
            Ok(()) => EndpointStatus::Connected,
            Err(error) => {
                warn!(%error, "target unreachable during startup probe");
                self.logs.push(format!("ERROR: target unreachable: {error}"));
                EndpointStatus::Error
            }
        };

        self.status.update(|status| {
            status.connection_status = connection_status;
            status.target_status = target_status;
        });
        self.logs.push(format!(
            "startup probe: source {}, target {}",
            connection_status.as_str(),
            target_status.as_str()
        ));
    }
}
