//! HTTP API server for the fleet sync engine

mod auth;
pub mod error;
pub mod export;
pub mod health;
pub mod identity;
pub mod import;
pub mod plugins;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::db::DbPool;
use crate::sync::{DownloadGate, Scheduler, SyncEngine};

pub use error::{ApiError, ApiResult, ErrorDetail, ErrorResponse};
pub use identity::Requester;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<Scheduler>,
    pub downloads: DownloadGate,
    pub api_key: Option<String>,
    /// Parent of every per-request cancellation token
    pub shutdown: CancellationToken,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    engine: Arc<SyncEngine>,
    scheduler: Arc<Scheduler>,
    port: u16,
    api_key: Option<String>,
    download_dir: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(db: DbPool, engine: Arc<SyncEngine>, scheduler: Arc<Scheduler>, port: u16) -> Self {
        Self {
            db,
            engine,
            scheduler,
            port,
            api_key: None,
            download_dir: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the admin key for guarded endpoints
    #[must_use]
    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Restrict downloads to files under this directory
    #[must_use]
    pub fn download_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.download_dir = dir;
        self
    }

    /// Token that stops the server and cancels in-flight executions
    #[must_use]
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        if self.api_key.is_none() {
            tracing::warn!("admin key not configured - sync endpoints are unauthenticated");
        }

        let state = Arc::new(ApiState {
            db: self.db,
            engine: self.engine,
            scheduler: self.scheduler,
            downloads: DownloadGate::new(self.download_dir),
            api_key: self.api_key,
            shutdown: self.shutdown,
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(export::router(self.state.clone()))
            .merge(import::router(self.state.clone()))
            .merge(plugins::router(self.state.clone()))
            .merge(health::router(self.state.clone()))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until the shutdown token fires
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
