//! Archive plugin: whole-fleet backups as one JSON or YAML document

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{apply_changes, checksum, plan_changes, read_source, sample, select_devices};
use crate::fleet::{Device, FleetStore};
use crate::plugins::{
    ConfigMap, ConfigSchema, ExportConfig, ExportOutput, FieldKind, ImportConfig, ImportOutput,
    PluginCapabilities, PluginContext, PluginInfo, PreviewOutput, SyncPlugin, decode_config,
};
use crate::{Error, Result};

const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize)]
struct ArchiveSettings {
    #[serde(default)]
    pretty: bool,
    #[serde(default)]
    prune: bool,
}

/// On-disk archive document
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveDocument {
    version: u32,
    exported_at: DateTime<Utc>,
    device_count: u64,
    /// Hex SHA-256 of the canonical JSON device list
    #[serde(default)]
    checksum: String,
    devices: Vec<Device>,
}

/// Backup/restore plugin for the whole fleet
pub struct ArchivePlugin {
    store: Arc<dyn FleetStore>,
    span: tracing::Span,
}

impl ArchivePlugin {
    #[must_use]
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self {
            store,
            span: tracing::Span::none(),
        }
    }

    fn encode(doc: &ArchiveDocument, format: &str, pretty: bool) -> Result<Vec<u8>> {
        match format {
            "yaml" => Ok(serde_yaml::to_string(doc)?.into_bytes()),
            _ if pretty => Ok(serde_json::to_vec_pretty(doc)?),
            _ => Ok(serde_json::to_vec(doc)?),
        }
    }

    fn decode(raw: &str, format: &str) -> Result<ArchiveDocument> {
        let doc = match format {
            "yaml" => serde_yaml::from_str(raw)?,
            _ => serde_json::from_str(raw)?,
        };
        Ok(doc)
    }

    fn build(&self, config: &ExportConfig, exported_at: DateTime<Utc>) -> Result<ArchiveDocument> {
        let devices = select_devices(self.store.as_ref(), &config.filters)?;
        Ok(ArchiveDocument {
            version: ARCHIVE_VERSION,
            exported_at,
            device_count: devices.len() as u64,
            checksum: checksum(&devices)?,
            devices,
        })
    }
}

#[async_trait]
impl SyncPlugin for ArchivePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "archive".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Single-document fleet backup with checksum".to_string(),
            formats: vec!["json".to_string(), "yaml".to_string()],
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
        ConfigSchema::default()
            .optional("pretty", FieldKind::Boolean, "Pretty-print JSON output")
            .optional("prune", FieldKind::Boolean, "Delete devices missing from the archive on import")
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<()> {
        self.config_schema().validate(config)?;
        decode_config::<ArchiveSettings>(config).map(|_| ())
    }

    async fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        self.span = ctx.span.clone();
        Ok(())
    }

    async fn export(&self, config: &ExportConfig) -> Result<ExportOutput> {
        let settings: ArchiveSettings = decode_config(&config.config)?;
        let doc = self.build(config, Utc::now())?;
        let bytes = Self::encode(&doc, &config.format, settings.pretty)?;

        let mut output = ExportOutput {
            record_count: doc.device_count,
            output_path: None,
            size_bytes: bytes.len() as u64,
            checksum: Some(doc.checksum),
        };

        if config.options.is_side_effect_free() {
            return Ok(output);
        }

        let path = config
            .destination()
            .ok_or_else(|| Error::Validation("archive export requires a destination".to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        self.span.in_scope(|| {
            tracing::info!(
                path = %path.display(),
                devices = output.record_count,
                bytes = output.size_bytes,
                "archive written"
            );
        });

        output.output_path = Some(path);
        Ok(output)
    }

    async fn import(&self, config: &ImportConfig) -> Result<ImportOutput> {
        let settings: ArchiveSettings = decode_config(&config.config)?;
        let raw = read_source(&config.source).await?;
        let doc = Self::decode(&raw, &config.format)?;

        if !doc.checksum.is_empty() && doc.checksum != checksum(&doc.devices)? {
            return Err(Error::PluginExecution(
                "archive checksum does not match its contents".to_string(),
            ));
        }

        let records_processed = doc.devices.len() as u64;
        let changes = plan_changes(self.store.list_devices()?, doc.devices, settings.prune)?;

        let applied = !config.options.is_side_effect_free();
        if applied {
            apply_changes(self.store.as_ref(), &changes)?;
            self.span.in_scope(|| {
                tracing::info!(changes = changes.len(), "archive restored");
            });
        }

        Ok(ImportOutput {
            records_processed,
            changes,
            applied,
        })
    }

    async fn preview(&self, config: &ExportConfig) -> Result<PreviewOutput> {
        let settings: ArchiveSettings = decode_config(&config.config)?;
        // Fixed timestamp keeps the size estimate stable across calls
        let doc = self.build(config, DateTime::<Utc>::UNIX_EPOCH)?;
        let bytes = Self::encode(&doc, &config.format, settings.pretty)?;

        Ok(PreviewOutput {
            record_count: doc.device_count,
            estimated_size: bytes.len() as u64,
            sample: sample(&doc.devices),
        })
    }
}
