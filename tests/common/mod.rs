//! Shared test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
};
use fleet_sync::api::ApiServerBuilder;
use fleet_sync::db::{self, HistoryRepo};
use fleet_sync::plugins::{
    Change, ChangeType, ConfigSchema, ExportConfig, ExportOutput, FieldKind, ImportConfig,
    ImportOutput, PluginCapabilities, PluginInfo, PluginRegistry, PreviewOutput, SyncPlugin,
};
use fleet_sync::sync::{EngineConfig, Scheduler, SchedulerConfig, SyncEngine};
use fleet_sync::{DbPool, Result};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Plugin that writes "hello world" to the requested destination
pub struct MockFilePlugin;

#[async_trait]
impl SyncPlugin for MockFilePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "mockfile".to_string(),
            version: "1.0.0".to_string(),
            description: "Writes a fixed text file".to_string(),
            formats: vec!["txt".to_string()],
        }
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            export: true,
            import: true,
            preview: true,
            dry_run: true,
        }
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default().optional("fail", FieldKind::Boolean, "Fail the export")
    }

    async fn export(&self, config: &ExportConfig) -> Result<ExportOutput> {
        if config.config.get("fail").and_then(serde_json::Value::as_bool) == Some(true) {
            return Err(fleet_sync::Error::PluginExecution("asked to fail".to_string()));
        }
        if config.options.is_side_effect_free() {
            return Ok(ExportOutput {
                record_count: 1,
                ..ExportOutput::default()
            });
        }
        let path = config
            .destination()
            .ok_or_else(|| fleet_sync::Error::Validation("destination required".to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, b"hello world").await?;
        Ok(ExportOutput {
            record_count: 1,
            output_path: Some(path),
            size_bytes: 11,
            checksum: None,
        })
    }

    async fn import(&self, config: &ImportConfig) -> Result<ImportOutput> {
        Ok(ImportOutput {
            records_processed: 1,
            changes: vec![Change {
                change_type: ChangeType::Create,
                target: "greeting".to_string(),
                before: None,
                after: Some(serde_json::json!({ "text": config.source.data })),
            }],
            applied: !config.options.is_side_effect_free(),
        })
    }

    async fn preview(&self, _config: &ExportConfig) -> Result<PreviewOutput> {
        Ok(PreviewOutput {
            record_count: 1,
            estimated_size: 11,
            sample: vec!["greeting".to_string()],
        })
    }
}

/// Router plus the pieces behind it
pub struct TestApp {
    pub router: Router,
    pub db: DbPool,
    pub engine: Arc<SyncEngine>,
    pub registry: Arc<PluginRegistry>,
    pub dir: TempDir,
}

impl TestApp {
    /// Build an app with the mock plugin registered
    ///
    /// With `restrict_downloads`, only files under `<tmp>/exports` are served.
    pub async fn spawn(admin_key: Option<&str>, restrict_downloads: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let export_dir = dir.path().join("exports");
        std::fs::create_dir_all(&export_dir).expect("export dir");

        let db = setup_test_db();
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Box::new(MockFilePlugin))
            .await
            .expect("register mock plugin");

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&registry),
            HistoryRepo::new(db.clone()),
            &EngineConfig {
                export_dir: export_dir.clone(),
                result_capacity: 100,
                result_ttl: Duration::from_secs(300),
            },
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&engine),
            SchedulerConfig::default(),
        ));

        let server = ApiServerBuilder::new(db.clone(), Arc::clone(&engine), scheduler, 0)
            .api_key(admin_key.map(String::from))
            .download_dir(restrict_downloads.then(|| export_dir.clone()))
            .build();

        Self {
            router: server.router(),
            db,
            engine,
            registry,
            dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router call")
    }

    /// Send a request and decode a JSON body (Null when empty)
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
        token: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.send(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.json(Method::GET, uri, None, None).await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.json(Method::POST, uri, Some(body), None).await
    }
}

/// Export request body for the mock plugin
pub fn mockfile_request(destination: &std::path::Path) -> serde_json::Value {
    serde_json::json!({
        "plugin_name": "mockfile",
        "format": "txt",
        "output": { "type": "file", "destination": destination.display().to_string() }
    })
}
