//! Export, preview, history, schedule and download endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::error::ApiResult;
use super::identity::Requester;
use super::{ApiState, auth::require_api_key};
use crate::Error;
use crate::db::{HistoryPage, HistoryQuery, SyncDirection, SyncStatistics};
use crate::sync::{
    CreateSchedule, ExportRequest, ExportResult, PreviewResult, Schedule, UpdateSchedule,
    ValidationReport,
};

/// Raw history query string; values are corrected, never rejected
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub plugin: Option<String>,
    pub success: Option<String>,
}

impl HistoryParams {
    pub fn to_query(&self) -> HistoryQuery {
        HistoryQuery::from_params(
            self.page.as_deref(),
            self.page_size.as_deref(),
            self.plugin.as_deref(),
            self.success.as_deref(),
        )
    }
}

/// Run an export and record it
async fn export(
    State(state): State<Arc<ApiState>>,
    requester: Requester,
    Json(req): Json<ExportRequest>,
) -> ApiResult<Json<ExportResult>> {
    let cancel = state.shutdown.child_token();
    let result = state.engine.export(&req, &cancel).await?;
    state.engine.record_export(&result, requester.as_str());
    Ok(Json(result))
}

async fn preview(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ExportRequest>,
) -> ApiResult<Json<PreviewResult>> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.engine.preview(&req, &cancel).await?))
}

async fn validate(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ExportRequest>,
) -> ApiResult<Json<ValidationReport>> {
    Ok(Json(state.engine.validation_report(&req).await?))
}

async fn history(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryPage>> {
    Ok(Json(
        state
            .engine
            .history(SyncDirection::Export, &params.to_query())?,
    ))
}

async fn statistics(State(state): State<Arc<ApiState>>) -> ApiResult<Json<SyncStatistics>> {
    Ok(Json(state.engine.statistics(SyncDirection::Export)?))
}

async fn get_result(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExportResult>> {
    Ok(Json(state.engine.get_export_result(&id)?))
}

/// Serve an export's output file
async fn download(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let result = state.engine.get_export_result(&id)?;
    let path = state.downloads.resolve(result.output_path.as_deref())?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export")
        .replace('"', "");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|e| Error::UnprocessableEntity(format!("unservable file name: {e}")))?;

    tracing::info!(export_id = %id, path = %path.display(), "serving export download");

    let served = ServeFile::new(&path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let mut response = served.map(Body::new);
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

// --- Schedules ---

async fn create_schedule(
    State(state): State<Arc<ApiState>>,
    requester: Requester,
    Json(input): Json<CreateSchedule>,
) -> ApiResult<(StatusCode, Json<Schedule>)> {
    let schedule = state.scheduler.create(input, requester.as_str()).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn list_schedules(State(state): State<Arc<ApiState>>) -> Json<Vec<Schedule>> {
    Json(state.scheduler.list().await)
}

async fn get_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.get(&id).await?))
}

async fn update_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(input): Json<UpdateSchedule>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.update(&id, input).await?))
}

async fn delete_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_schedule(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    requester: Requester,
) -> ApiResult<Json<ExportResult>> {
    let cancel = state.shutdown.child_token();
    let result = state
        .scheduler
        .run_now(&id, requester.as_str(), &cancel)
        .await?;
    Ok(Json(result))
}

/// Build export routes behind the admin key guard
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/export", post(export))
        .route("/export/preview", post(preview))
        .route("/export/validate", post(validate))
        .route("/export/history", get(history))
        .route("/export/statistics", get(statistics))
        .route(
            "/export/schedules",
            get(list_schedules).post(create_schedule),
        )
        .route(
            "/export/schedules/{id}",
            get(get_schedule)
                .put(update_schedule)
                .delete(delete_schedule),
        )
        .route("/export/schedules/{id}/run", post(run_schedule))
        .route("/export/{id}", get(get_result))
        .route("/export/{id}/download", get(download))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
