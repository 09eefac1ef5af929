//! Import endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
};

use super::error::ApiResult;
use super::export::HistoryParams;
use super::identity::Requester;
use super::{ApiState, auth::require_api_key};
use crate::db::{HistoryPage, SyncDirection, SyncStatistics};
use crate::sync::{ImportRequest, ImportResult};

async fn import(
    State(state): State<Arc<ApiState>>,
    requester: Requester,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportResult>> {
    let cancel = state.shutdown.child_token();
    let result = state.engine.import(&req, &cancel).await?;
    state.engine.record_import(&result, requester.as_str());
    Ok(Json(result))
}

/// Dry-run an import; nothing is cached or recorded
async fn preview(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportResult>> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.engine.preview_import(&req, &cancel).await?))
}

async fn history(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryPage>> {
    Ok(Json(
        state
            .engine
            .history(SyncDirection::Import, &params.to_query())?,
    ))
}

async fn statistics(State(state): State<Arc<ApiState>>) -> ApiResult<Json<SyncStatistics>> {
    Ok(Json(state.engine.statistics(SyncDirection::Import)?))
}

async fn get_result(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ImportResult>> {
    Ok(Json(state.engine.get_import_result(&id)?))
}

/// Build import routes behind the admin key guard
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/import", post(import))
        .route("/import/preview", post(preview))
        .route("/import/history", get(history))
        .route("/import/statistics", get(statistics))
        .route("/import/{id}", get(get_result))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
