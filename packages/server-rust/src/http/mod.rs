//! HTTP surface: health, operator status, the log ring, the auto-sync
//! toggle, and the paginated pull API.
//!
//! The pull API is a thin read-through of the same extractors the engine
//! uses: remote devices carry their own `(since, afterId)` cursor in query
//! parameters and page until `saturated` turns false. No checkpoint state
//! lives here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tillsync_core::{EntityKind, PageCursor, StatusSnapshot};

use crate::config::ServiceConfig;
use crate::logring::LogRing;
use crate::scheduler::Scheduler;
use crate::status::StatusPublisher;
use crate::traits::EntityExtractor;

/// Fallback page size for the pull API when an entity has no configured
/// batch size (snapshot entities).
const SNAPSHOT_PAGE_LIMIT: usize = 1_000;

/// Shared application state passed to all axum handlers via `State`
/// extraction. Holds `Arc` references so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub status: StatusPublisher,
    pub logs: Arc<LogRing>,
    pub extractors: Arc<Vec<Arc<dyn EntityExtractor>>>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<ServiceConfig>,
}

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .route("/logs", get(logs_handler))
        .route("/sync/enable", post(enable_handler))
        .route("/sync/disable", post(disable_handler))
        .route("/pull/{entity}", get(pull_handler))
        .with_state(state)
}

/// Liveness probe: the process is up and serving.
async fn healthz_handler() -> StatusCode {
    StatusCode::OK
}

/// Current status snapshot as JSON.
async fn status_handler(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(StatusSnapshot::clone(&state.status.snapshot()))
}

/// Ring buffer contents, oldest first.
async fn logs_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.logs.lines())
}

async fn enable_handler(State(state): State<AppState>) -> StatusCode {
    state.scheduler.set_enabled(true);
    StatusCode::NO_CONTENT
}

async fn disable_handler(State(state): State<AppState>) -> StatusCode {
    state.scheduler.set_enabled(false);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    since: Option<DateTime<Utc>>,
    after_id: Option<i64>,
    page_size: Option<usize>,
}

/// One page of an entity's change stream.
async fn pull_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(kind) = EntityKind::parse(&entity) else {
        return Err((StatusCode::NOT_FOUND, format!("unknown entity {entity}")));
    };
    let Some(extractor) = state
        .extractors
        .iter()
        .find(|extractor| extractor.entity() == kind)
    else {
        return Err((StatusCode::NOT_FOUND, format!("{entity} is not registered")));
    };

    let limit = state.config.batch_size(kind).unwrap_or(SNAPSHOT_PAGE_LIMIT);
    let page_size = query.page_size.unwrap_or(limit).min(limit);
    let cursor = PageCursor {
        since: query
            .since
            .unwrap_or_else(|| Utc::now() - state.config.default_window(kind)),
        after_id: query.after_id.unwrap_or(0),
    };

    let page = extractor
        .changed_page(cursor, page_size)
        .await
        .map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))?;

    let documents: Vec<Value> = page
        .docs
        .iter()
        .map(|doc| serde_json::to_value(&doc.document).unwrap_or(Value::Null))
        .collect();

    Ok(Json(json!({
        "entity": kind.collection(),
        "documents": documents,
        "fetched": page.fetched,
        "skipped": page.skipped,
        "saturated": page.saturated(page_size),
        "nextSince": page.next.map(|next| next.since.to_rfc3339()),
        "nextAfterId": page.next.map(|next| next.after_id),
    })))
}
