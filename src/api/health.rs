//! Liveness and readiness probes

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness report with one entry per dependency
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub plugins: usize,
    pub schedules: usize,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub database: Probe,
    pub plugins: Probe,
    pub export_dir: Probe,
}

/// Outcome of one readiness probe
#[derive(Serialize)]
pub struct Probe {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Probe {
    const PASS: &'static str = "ok";

    const fn pass() -> Self {
        Self {
            status: Self::PASS,
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }

    fn passed(&self) -> bool {
        self.status == Self::PASS
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Ready once history can be written, a plugin exists and exports have a home
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let plugin_count = state.engine.registry().len().await;
    let checks = ReadinessChecks {
        database: probe_database(&state),
        plugins: if plugin_count == 0 {
            Probe::fail("no plugins registered")
        } else {
            Probe::pass()
        },
        export_dir: probe_export_dir(&state).await,
    };

    let ready = checks.database.passed() && checks.plugins.passed() && checks.export_dir.passed();
    if !ready {
        tracing::warn!("readiness probe failing");
    }

    (
        if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
        Json(ReadinessResponse {
            status: if ready { "ok" } else { "degraded" },
            plugins: plugin_count,
            schedules: state.scheduler.list().await.len(),
            checks,
        }),
    )
}

fn probe_database(state: &ApiState) -> Probe {
    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => return Probe::fail(format!("connection failed: {e}")),
    };
    conn.query_row("SELECT COUNT(*) FROM sync_history", [], |row| row.get::<_, i64>(0))
        .map_or_else(|e| Probe::fail(format!("history unreadable: {e}")), |_| Probe::pass())
}

async fn probe_export_dir(state: &ApiState) -> Probe {
    let dir = state.engine.export_dir();
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Probe::pass(),
        Ok(_) => Probe::fail(format!("{} is not a directory", dir.display())),
        Err(e) => Probe::fail(format!("{}: {e}", dir.display())),
    }
}

/// Probe routes, never behind the admin key
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}
