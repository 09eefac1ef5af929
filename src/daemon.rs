//! Daemon - the fleet sync service
//!
//! Wires the database, plugin registry, engine, scheduler and HTTP API, then
//! runs until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::ApiServerBuilder;
use crate::db::{self, DbPool, DeviceRepo, HistoryRepo};
use crate::fleet::FleetStore;
use crate::plugins::{PluginRegistry, builtin};
use crate::sync::{Scheduler, SyncEngine};
use crate::{Config, Result};

/// The fleet sync daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
    registry: Arc<PluginRegistry>,
    engine: Arc<SyncEngine>,
}

impl Daemon {
    /// Open the database and register built-in plugins
    ///
    /// # Errors
    ///
    /// Returns error if the database or export directory cannot be opened, or
    /// a plugin fails to register
    pub async fn new(config: Config) -> Result<Self> {
        let db_path = config.db_path();
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        std::fs::create_dir_all(&config.sync.export_dir)?;

        let registry = Arc::new(PluginRegistry::new());
        let store: Arc<dyn FleetStore> = Arc::new(DeviceRepo::new(db.clone()));
        builtin::register_builtin(&registry, store).await?;

        tracing::info!(count = registry.len().await, "plugins registered");

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&registry),
            HistoryRepo::new(db.clone()),
            &config.sync.engine_config(),
        ));

        Ok(Self {
            config,
            db,
            registry,
            engine,
        })
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Clean up every plugin
    pub async fn shutdown_plugins(&self) {
        for (name, e) in self.registry.shutdown().await {
            tracing::warn!(plugin = %name, error = %e, "plugin cleanup failed during shutdown");
        }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&self.engine),
            self.config.scheduler.clone(),
        ));
        let scheduler_task = Arc::clone(&scheduler).spawn(shutdown.child_token());

        let server = ApiServerBuilder::new(
            self.db.clone(),
            Arc::clone(&self.engine),
            scheduler,
            self.config.api_server.port,
        )
        .api_key(self.config.api_server.admin_key.clone())
        .download_dir(self.config.sync.download_dir.clone())
        .shutdown(shutdown.clone())
        .build();
        let mut server_task = server.spawn();

        tracing::info!(
            port = self.config.api_server.port,
            export_dir = %self.config.sync.export_dir.display(),
            "fleet sync daemon running"
        );

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
                (&mut server_task).await
            }
            joined = &mut server_task => {
                shutdown.cancel();
                joined
            }
        };

        if let Err(e) = scheduler_task.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
        self.shutdown_plugins().await;

        match outcome {
            Ok(result) => result,
            Err(e) => Err(crate::Error::Config(format!("API server task failed: {e}"))),
        }
    }
}
