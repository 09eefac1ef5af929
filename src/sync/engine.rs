//! Execution coordinator for exports, imports and previews

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{
    ExportRequest, ExportResult, ImportRequest, ImportResult, PreviewResult, ResultCache,
    ValidationReport,
};
use crate::db::{HistoryPage, HistoryQuery, HistoryRepo, SyncDirection, SyncStatistics};
use crate::plugins::{
    ChangeType, ExportConfig, ImportConfig, OutputKind, OutputSpec, PluginRegistry, SyncPlugin,
};
use crate::{Error, Result};

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory used when a request names no destination
    pub export_dir: PathBuf,
    /// Maximum number of cached results per direction
    pub result_capacity: u64,
    /// How long results stay retrievable by id
    pub result_ttl: Duration,
}

/// Runs plugin executions and keeps their results
pub struct SyncEngine {
    registry: Arc<PluginRegistry>,
    history: HistoryRepo,
    exports: ResultCache<ExportResult>,
    imports: ResultCache<ImportResult>,
    export_dir: PathBuf,
}

impl SyncEngine {
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, history: HistoryRepo, config: &EngineConfig) -> Self {
        Self {
            registry,
            history,
            exports: ResultCache::new(config.result_capacity, config.result_ttl),
            imports: ResultCache::new(config.result_capacity, config.result_ttl),
            export_dir: config.export_dir.clone(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Directory that receives exports without an explicit destination
    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Resolve the plugin for an export request and check it accepts the request
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the plugin name is empty or unknown, the format
    /// or operation is unsupported, or the plugin rejects the config
    pub async fn validate(&self, req: &ExportRequest) -> Result<Arc<dyn SyncPlugin>> {
        let plugin = self.resolve(&req.plugin_name, &req.format).await?;
        if !plugin.capabilities().export {
            return Err(Error::Validation(format!(
                "plugin '{}' does not support export",
                req.plugin_name
            )));
        }
        validate_config(plugin.as_ref(), &req.config)?;
        Ok(plugin)
    }

    /// Validation outcome as a report instead of an error
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are returned; rejected requests yield
    /// `valid = false`
    pub async fn validation_report(&self, req: &ExportRequest) -> Result<ValidationReport> {
        match self.validate(req).await {
            Ok(_) => Ok(ValidationReport {
                valid: true,
                errors: Vec::new(),
            }),
            Err(Error::Validation(msg)) => Ok(ValidationReport {
                valid: false,
                errors: msg.split("; ").map(str::to_string).collect(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Run an export and cache its result
    ///
    /// Plugin failures are captured as `success = false` results. The result
    /// is cached only after the plugin call returns.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for rejected requests and `Cancelled` if `cancel`
    /// fires before the plugin finishes
    pub async fn export(&self, req: &ExportRequest, cancel: &CancellationToken) -> Result<ExportResult> {
        let plugin = self.validate(req).await?;
        let req = &ExportRequest {
            format: declared_format(plugin.as_ref(), &req.format),
            ..req.clone()
        };

        let id = uuid::Uuid::new_v4().to_string();
        let config = self.export_config(&id, req, plugin.as_ref());
        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::debug!(export_id = %id, plugin = %req.plugin_name, format = %req.format, "export started");

        let outcome = cancellable(cancel, plugin.export(&config)).await?;
        let mut result = self.export_result(id, req, started_at, clock);

        match outcome {
            Ok(out) => {
                result.record_count = out.record_count;
                result.output_path = out.output_path.map(|p| p.display().to_string());
                result.size_bytes = out.size_bytes;
                result.checksum = out.checksum;
                tracing::info!(
                    export_id = %result.id,
                    plugin = %result.plugin_name,
                    records = result.record_count,
                    dry_run = result.dry_run,
                    "export completed"
                );
            }
            Err(e) => {
                tracing::warn!(export_id = %result.id, plugin = %result.plugin_name, error = %e, "export failed");
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        self.exports.insert(&result.id, result.clone());
        Ok(result)
    }

    /// Cache a failed export that never reached the plugin
    ///
    /// Used by the scheduler so a rejected or timed-out run still leaves a
    /// result behind.
    #[must_use]
    pub fn capture_export_failure(&self, req: &ExportRequest, error: &Error) -> ExportResult {
        let id = uuid::Uuid::new_v4().to_string();
        let mut result = self.export_result(id, req, Utc::now(), Instant::now());
        result.success = false;
        result.error = Some(error.to_string());
        self.exports.insert(&result.id, result.clone());
        result
    }

    /// Report what an export would produce
    ///
    /// Never writes files or touches the result cache.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for rejected requests, `PluginExecution` if the
    /// plugin fails and `Cancelled` if `cancel` fires
    pub async fn preview(&self, req: &ExportRequest, cancel: &CancellationToken) -> Result<PreviewResult> {
        let plugin = self.validate(req).await?;
        if !plugin.capabilities().preview {
            return Err(Error::Validation(format!(
                "plugin '{}' does not support preview",
                req.plugin_name
            )));
        }

        let req = &ExportRequest {
            format: declared_format(plugin.as_ref(), &req.format),
            ..req.clone()
        };

        let id = uuid::Uuid::new_v4().to_string();
        let mut config = self.export_config(&id, req, plugin.as_ref());
        config.options.dry_run = true;

        let preview = cancellable(cancel, plugin.preview(&config))
            .await?
            .map_err(|e| Error::PluginExecution(e.to_string()))?;

        Ok(PreviewResult {
            plugin_name: req.plugin_name.clone(),
            format: req.format.clone(),
            preview,
        })
    }

    /// Resolve and check the plugin for an import request
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the request is rejected
    pub async fn validate_import(&self, req: &ImportRequest) -> Result<Arc<dyn SyncPlugin>> {
        let plugin = self.resolve(&req.plugin_name, &req.format).await?;
        if !plugin.capabilities().import {
            return Err(Error::Validation(format!(
                "plugin '{}' does not support import",
                req.plugin_name
            )));
        }
        if req.source.kind.trim().is_empty() {
            return Err(Error::Validation("source.type is required".to_string()));
        }
        validate_config(plugin.as_ref(), &req.config)?;
        Ok(plugin)
    }

    /// Run an import and cache its result
    ///
    /// # Errors
    ///
    /// Returns `Validation` for rejected requests and `Cancelled` if `cancel`
    /// fires before the plugin finishes
    pub async fn import(&self, req: &ImportRequest, cancel: &CancellationToken) -> Result<ImportResult> {
        let result = self.run_import(req, cancel).await?;
        self.imports.insert(&result.id, result.clone());
        Ok(result)
    }

    /// Dry-run an import and return the change list without caching it
    ///
    /// # Errors
    ///
    /// Same as [`import`](Self::import)
    pub async fn preview_import(&self, req: &ImportRequest, cancel: &CancellationToken) -> Result<ImportResult> {
        let mut req = req.clone();
        req.options.dry_run = true;
        self.run_import(&req, cancel).await
    }

    async fn run_import(&self, req: &ImportRequest, cancel: &CancellationToken) -> Result<ImportResult> {
        let plugin = self.validate_import(req).await?;
        let req = &ImportRequest {
            format: declared_format(plugin.as_ref(), &req.format),
            ..req.clone()
        };

        let id = uuid::Uuid::new_v4().to_string();
        let config = ImportConfig {
            execution_id: id.clone(),
            format: req.format.clone(),
            config: req.config.clone(),
            source: req.source.clone(),
            options: req.options,
        };
        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::debug!(import_id = %id, plugin = %req.plugin_name, format = %req.format, "import started");

        let outcome = cancellable(cancel, plugin.import(&config)).await?;
        let completed_at = Utc::now();

        let mut result = ImportResult {
            id,
            success: true,
            plugin_name: req.plugin_name.clone(),
            format: req.format.clone(),
            records_processed: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            changes: Vec::new(),
            applied: false,
            dry_run: req.options.dry_run,
            validate_only: req.options.validate_only,
            error: None,
            started_at,
            completed_at,
            duration_ms: elapsed_ms(clock),
        };

        match outcome {
            Ok(out) => {
                result.created = out.count(ChangeType::Create);
                result.updated = out.count(ChangeType::Update);
                result.deleted = out.count(ChangeType::Delete);
                result.records_processed = out.records_processed;
                result.applied = out.applied;
                result.changes = out.changes;
                tracing::info!(
                    import_id = %result.id,
                    plugin = %result.plugin_name,
                    created = result.created,
                    updated = result.updated,
                    deleted = result.deleted,
                    applied = result.applied,
                    "import completed"
                );
            }
            Err(e) => {
                tracing::warn!(import_id = %result.id, plugin = %result.plugin_name, error = %e, "import failed");
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        Ok(result)
    }

    /// Look up a cached export result
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown or evicted
    pub fn get_export_result(&self, id: &str) -> Result<ExportResult> {
        self.exports
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("export result '{id}'")))
    }

    /// Look up a cached import result
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is unknown or evicted
    pub fn get_import_result(&self, id: &str) -> Result<ImportResult> {
        self.imports
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("import result '{id}'")))
    }

    /// Append an export to history; failures are logged only
    pub fn record_export(&self, result: &ExportResult, requester: &str) {
        if let Err(e) = self.history.save(&result.to_history(requester)) {
            tracing::error!(export_id = %result.id, error = %e, "failed to record export history");
        }
    }

    /// Append an import to history; failures are logged only
    pub fn record_import(&self, result: &ImportResult, requester: &str) {
        if let Err(e) = self.history.save(&result.to_history(requester)) {
            tracing::error!(import_id = %result.id, error = %e, "failed to record import history");
        }
    }

    /// # Errors
    ///
    /// Returns error if the history store cannot be read
    pub fn history(&self, direction: SyncDirection, query: &HistoryQuery) -> Result<HistoryPage> {
        self.history.list(direction, query)
    }

    /// # Errors
    ///
    /// Returns error if the history store cannot be read
    pub fn statistics(&self, direction: SyncDirection) -> Result<SyncStatistics> {
        self.history.statistics(direction)
    }

    async fn resolve(&self, plugin_name: &str, format: &str) -> Result<Arc<dyn SyncPlugin>> {
        if plugin_name.trim().is_empty() {
            return Err(Error::Validation("plugin_name is required".to_string()));
        }
        let plugin = self
            .registry
            .get(plugin_name)
            .await
            .map_err(|_| Error::Validation(format!("unknown plugin '{plugin_name}'")))?;

        if format.trim().is_empty() {
            return Err(Error::Validation("format is required".to_string()));
        }
        let info = plugin.info();
        if !info.supports_format(format) {
            return Err(Error::Validation(format!(
                "plugin '{plugin_name}' does not support format '{format}' (supported: {})",
                info.formats.join(", ")
            )));
        }

        Ok(plugin)
    }

    /// Plugin-facing config; without a destination the plugin's own output
    /// shape picks the default path
    fn export_config(&self, id: &str, req: &ExportRequest, plugin: &dyn SyncPlugin) -> ExportConfig {
        let output = match req.output.destination.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(destination) => OutputSpec {
                kind: req.output.kind,
                destination: Some(destination.to_string()),
            },
            None => {
                let kind = plugin.output_kind();
                OutputSpec {
                    kind,
                    destination: Some(self.default_destination(id, req, kind).display().to_string()),
                }
            }
        };

        ExportConfig {
            execution_id: id.to_string(),
            format: req.format.clone(),
            config: req.config.clone(),
            filters: req.filters.clone(),
            output,
            options: req.options,
        }
    }

    fn default_destination(&self, id: &str, req: &ExportRequest, kind: OutputKind) -> PathBuf {
        let name = match kind {
            OutputKind::File => format!("{}-{id}.{}", req.plugin_name, req.format.to_lowercase()),
            OutputKind::Directory => format!("{}-{id}", req.plugin_name),
        };
        self.export_dir.join(name)
    }

    fn export_result(
        &self,
        id: String,
        req: &ExportRequest,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> ExportResult {
        ExportResult {
            id,
            success: true,
            plugin_name: req.plugin_name.clone(),
            format: req.format.clone(),
            record_count: 0,
            output_path: None,
            size_bytes: 0,
            checksum: None,
            dry_run: req.options.dry_run,
            validate_only: req.options.validate_only,
            error: None,
            started_at,
            completed_at: Utc::now(),
            duration_ms: elapsed_ms(clock),
        }
    }
}

/// Replace a request's format with the plugin's declared spelling
fn declared_format(plugin: &dyn SyncPlugin, format: &str) -> String {
    plugin
        .info()
        .declared_format(format)
        .map_or_else(|| format.to_string(), str::to_string)
}

fn validate_config(plugin: &dyn SyncPlugin, config: &crate::plugins::ConfigMap) -> Result<()> {
    plugin.validate_config(config).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(msg),
        other => Error::Validation(other.to_string()),
    })
}

/// Race a plugin call against a cancellation token
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<Result<T>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled("execution cancelled".to_string())),
        out = fut => Ok(out),
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}
