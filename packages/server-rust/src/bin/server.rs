//! Service binary: wire the stores, extractors, engine, scheduler, and the
//! HTTP surface together, then run until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tillsync_core::ServerStatus;
use tillsync_server::config::ServiceConfig;
use tillsync_server::engine::SyncEngine;
use tillsync_server::extract::{
    BusinessSettingExtractor, CategoryExtractor, CustomerExtractor, EmployeeExtractor,
    ExpenseExtractor, ProductExtractor, TransactionExtractor,
};
use tillsync_server::http::{build_router, AppState};
use tillsync_server::logring::LogRing;
use tillsync_server::scheduler::Scheduler;
use tillsync_server::source::{PgCheckpointStore, SourcePool};
use tillsync_server::status::StatusPublisher;
use tillsync_server::store::MongoTargetStore;
use tillsync_server::traits::{BulkSource, CheckpointStore, EntityExtractor, SyncRunner, TargetStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::parse();
    config.validate().context("configuration rejected")?;
    let config = Arc::new(config);

    let source_url = config
        .source_url
        .clone()
        .context("source URL missing after validation")?;
    let target_url = config
        .target_url
        .clone()
        .context("target URL missing after validation")?;

    let source = SourcePool::connect(&source_url)
        .await
        .context("connecting to the relational source")?;
    let checkpoints = Arc::new(PgCheckpointStore::new(source.pool().clone()));
    checkpoints
        .ensure_schema()
        .await
        .context("ensuring the checkpoint table")?;

    let target = Arc::new(
        MongoTargetStore::connect(
            &target_url,
            &config.target_database,
            Duration::from_secs(config.server_selection_timeout_seconds),
            config.bulk_deadline(),
        )
        .await
        .context("connecting to the document store")?,
    );

    let status = StatusPublisher::new();
    let logs = Arc::new(LogRing::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = source.pool().clone();
    let transactions = Arc::new(TransactionExtractor::new(pool.clone()));

    let engine = SyncEngine::new(
        Arc::clone(&config),
        Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        Arc::clone(&target) as Arc<dyn TargetStore>,
        status.clone(),
        Arc::clone(&logs),
    )
    .with_source_pool(source.clone())
    .with_shutdown(shutdown_rx)
    .with_extractor(Arc::new(CategoryExtractor::new(pool.clone())))
    .with_extractor(Arc::new(ProductExtractor::new(pool.clone())))
    .with_extractor(Arc::new(CustomerExtractor::new(pool.clone())))
    .with_extractor(Arc::new(BusinessSettingExtractor::new(pool.clone())))
    .with_extractor(Arc::new(EmployeeExtractor::new(pool.clone())))
    .with_extractor(Arc::new(ExpenseExtractor::new(pool)))
    .with_extractor(Arc::clone(&transactions) as Arc<dyn EntityExtractor>)
    .with_bulk_source(transactions as Arc<dyn BulkSource>);
    let engine = Arc::new(engine);

    if config.bulk_backfill {
        let summary = engine
            .run_transaction_backfill()
            .await
            .context("transaction history backfill")?;
        info!(
            records = summary.records,
            windows = summary.windows,
            completed = summary.completed,
            "backfill finished"
        );
    }

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&engine) as Arc<dyn SyncRunner>,
        config.tick_interval(),
        status.clone(),
    ));
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());

    if config.auto_sync {
        scheduler.set_enabled(true);
    }
    status.update(|snapshot| snapshot.server_status = ServerStatus::Running);

    let state = AppState {
        status: status.clone(),
        logs,
        extractors: Arc::new(engine.extractors().to_vec()),
        scheduler: Arc::clone(&scheduler),
        config: Arc::clone(&config),
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, device_id = %config.device_id, "tillsync server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received; finishing the current pass");
            let _ = shutdown_tx.send(true);
            scheduler.trigger_shutdown();
        })
        .await
        .context("http server")?;

    scheduler_task.await.context("scheduler task")?;
    info!("tillsync server stopped");
    Ok(())
}
