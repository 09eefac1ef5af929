//! Plugin discovery endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    routing::get,
};

use super::error::ApiResult;
use super::{ApiState, auth::require_api_key};
use crate::plugins::{PluginDescriptor, PluginInfo};

/// List registered plugins in registration order
async fn list_plugins(State(state): State<Arc<ApiState>>) -> Json<Vec<PluginInfo>> {
    Json(state.engine.registry().list().await)
}

/// Describe one plugin: formats, capabilities and config schema
async fn get_plugin(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<PluginDescriptor>> {
    Ok(Json(state.engine.registry().describe(&name).await?))
}

/// Build plugin routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/plugins/{name}", get(get_plugin))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
