//! GitOps plugin: declarative YAML tree, one file per device
//!
//! Layout under the destination directory:
//!
//! ```text
//! fleet.yaml            index (version, device ids, checksum)
//! devices/<id>.yaml     one device each
//! ```
//!
//! The tree is meant to be committed to a repository; re-exporting removes
//! device files that no longer match the selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{apply_changes, checksum, plan_changes, sample, select_devices};
use crate::fleet::{Device, FleetStore};
use crate::plugins::{
    ConfigMap, ConfigSchema, ExportConfig, ExportOutput, FieldKind, ImportConfig, ImportOutput,
    OutputKind, PluginCapabilities, PluginContext, PluginInfo, PreviewOutput, SourceSpec,
    SyncPlugin, decode_config,
};
use crate::{Error, Result};

const INDEX_FILE: &str = "fleet.yaml";
const DEVICES_DIR: &str = "devices";

#[derive(Debug, Default, Deserialize)]
struct GitOpsSettings {
    #[serde(default)]
    prune: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct FleetIndex {
    version: u32,
    device_count: u64,
    checksum: String,
    devices: Vec<String>,
}

/// Declarative-tree export/import plugin
pub struct GitOpsPlugin {
    store: Arc<dyn FleetStore>,
    span: tracing::Span,
}

impl GitOpsPlugin {
    #[must_use]
    pub fn new(store: Arc<dyn FleetStore>) -> Self {
        Self {
            store,
            span: tracing::Span::none(),
        }
    }

    /// Render the tree in memory as (relative path, contents) pairs
    fn render(devices: &[Device]) -> Result<Vec<(PathBuf, String)>> {
        let mut files = Vec::with_capacity(devices.len() + 1);
        let mut seen = std::collections::HashSet::new();

        for device in devices {
            let file_name = format!("{}.yaml", file_stem(&device.id));
            if !seen.insert(file_name.clone()) {
                return Err(Error::PluginExecution(format!(
                    "device ids collide on file name '{file_name}'"
                )));
            }
            files.push((
                Path::new(DEVICES_DIR).join(file_name),
                serde_yaml::to_string(device)?,
            ));
        }

        let index = FleetIndex {
            version: 1,
            device_count: devices.len() as u64,
            checksum: checksum(devices)?,
            devices: devices.iter().map(|d| d.id.clone()).collect(),
        };
        files.push((PathBuf::from(INDEX_FILE), serde_yaml::to_string(&index)?));

        Ok(files)
    }

    async fn write_tree(root: &Path, files: &[(PathBuf, String)]) -> Result<u64> {
        let devices_dir = root.join(DEVICES_DIR);
        tokio::fs::create_dir_all(&devices_dir).await?;

        // Drop device files that are no longer part of the export
        let keep: std::collections::HashSet<_> =
            files.iter().map(|(rel, _)| root.join(rel)).collect();
        let mut entries = tokio::fs::read_dir(&devices_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = path.extension().is_some_and(|e| e == "yaml");
            if is_yaml && !keep.contains(&path) {
                tokio::fs::remove_file(&path).await?;
            }
        }

        let mut written = 0u64;
        for (rel, contents) in files {
            tokio::fs::write(root.join(rel), contents).await?;
            written += contents.len() as u64;
        }
        Ok(written)
    }

    async fn read_tree(root: &Path) -> Result<Vec<Device>> {
        let devices_dir = root.join(DEVICES_DIR);
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&devices_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "yaml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut devices = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read_to_string(&path).await?;
            let device: Device = serde_yaml::from_str(&raw).map_err(|e| {
                Error::PluginExecution(format!("{}: {e}", path.display()))
            })?;
            devices.push(device);
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));

        let index_path = root.join(INDEX_FILE);
        if tokio::fs::try_exists(&index_path).await? {
            let index: FleetIndex = serde_yaml::from_str(&tokio::fs::read_to_string(&index_path).await?)?;
            if index.checksum != checksum(&devices)? {
                return Err(Error::PluginExecution(
                    "device files do not match fleet.yaml checksum".to_string(),
                ));
            }
        }

        Ok(devices)
    }
}

/// Map a device id onto a safe file stem
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

fn source_root(source: &SourceSpec) -> Result<PathBuf> {
    match source.kind.as_str() {
        "directory" | "file" => source
            .location
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Validation("gitops source requires 'location'".to_string())),
        other => Err(Error::Validation(format!(
            "gitops imports read a directory, not '{other}'"
        ))),
    }
}

#[async_trait]
impl SyncPlugin for GitOpsPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "gitops".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Declarative YAML tree for version-controlled fleets".to_string(),
            formats: vec!["yaml".to_string()],
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

    fn output_kind(&self) -> OutputKind {
        OutputKind::Directory
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default().optional(
            "prune",
            FieldKind::Boolean,
            "Delete devices missing from the tree on import",
        )
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<()> {
        self.config_schema().validate(config)?;
        decode_config::<GitOpsSettings>(config).map(|_| ())
    }

    async fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        self.span = ctx.span.clone();
        Ok(())
    }

    async fn export(&self, config: &ExportConfig) -> Result<ExportOutput> {
        let devices = select_devices(self.store.as_ref(), &config.filters)?;
        let files = Self::render(&devices)?;

        let mut output = ExportOutput {
            record_count: devices.len() as u64,
            output_path: None,
            size_bytes: files.iter().map(|(_, c)| c.len() as u64).sum(),
            checksum: Some(checksum(&devices)?),
        };

        if config.options.is_side_effect_free() {
            return Ok(output);
        }

        let root = config
            .destination()
            .ok_or_else(|| Error::Validation("gitops export requires a destination".to_string()))?;
        output.size_bytes = Self::write_tree(&root, &files).await?;

        self.span.in_scope(|| {
            tracing::info!(
                root = %root.display(),
                devices = output.record_count,
                "gitops tree written"
            );
        });

        output.output_path = Some(root);
        Ok(output)
    }

    async fn import(&self, config: &ImportConfig) -> Result<ImportOutput> {
        let settings: GitOpsSettings = decode_config(&config.config)?;
        let root = source_root(&config.source)?;
        let desired = Self::read_tree(&root).await?;

        let records_processed = desired.len() as u64;
        let changes = plan_changes(self.store.list_devices()?, desired, settings.prune)?;

        let applied = !config.options.is_side_effect_free();
        if applied {
            apply_changes(self.store.as_ref(), &changes)?;
            self.span.in_scope(|| {
                tracing::info!(changes = changes.len(), root = %root.display(), "gitops tree applied");
            });
        }

        Ok(ImportOutput {
            records_processed,
            changes,
            applied,
        })
    }

    async fn preview(&self, config: &ExportConfig) -> Result<PreviewOutput> {
        let devices = select_devices(self.store.as_ref(), &config.filters)?;
        let files = Self::render(&devices)?;

        Ok(PreviewOutput {
            record_count: devices.len() as u64,
            estimated_size: files.iter().map(|(_, c)| c.len() as u64).sum(),
            sample: sample(&devices),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::store_with;
    use super::*;
    use crate::plugins::{ExecutionOptions, OutputKind, OutputSpec};

    fn export_config(root: &Path, filters: ConfigMap) -> ExportConfig {
        ExportConfig {
            execution_id: "exec-1".to_string(),
            format: "yaml".to_string(),
            config: ConfigMap::new(),
            filters,
            output: OutputSpec {
                kind: OutputKind::Directory,
                destination: Some(root.display().to_string()),
            },
            options: ExecutionOptions::default(),
        }
    }

    fn import_config(root: &Path, options: ExecutionOptions) -> ImportConfig {
        ImportConfig {
            execution_id: "exec-2".to_string(),
            format: "yaml".to_string(),
            config: ConfigMap::new(),
            source: SourceSpec {
                kind: "directory".to_string(),
                location: Some(root.display().to_string()),
                data: None,
            },
            options,
        }
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("plug-01"), "plug-01");
        assert_eq!(file_stem("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(file_stem("a b/c"), "a_b_c");
    }

    #[tokio::test]
    async fn test_export_writes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = GitOpsPlugin::new(Arc::new(store_with(&["a", "b"])));

        let out = plugin
            .export(&export_config(dir.path(), ConfigMap::new()))
            .await
            .unwrap();
        assert_eq!(out.record_count, 2);
        assert!(dir.path().join("fleet.yaml").exists());
        assert!(dir.path().join("devices/a.yaml").exists());
        assert!(dir.path().join("devices/b.yaml").exists());
    }

    #[tokio::test]
    async fn test_reexport_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = GitOpsPlugin::new(Arc::new(store_with(&["a", "b"])));
        plugin
            .export(&export_config(dir.path(), ConfigMap::new()))
            .await
            .unwrap();

        let filters = serde_json::json!({ "device_ids": ["a"] });
        plugin
            .export(&export_config(dir.path(), filters.as_object().cloned().unwrap()))
            .await
            .unwrap();
        assert!(dir.path().join("devices/a.yaml").exists());
        assert!(!dir.path().join("devices/b.yaml").exists());
    }

    #[tokio::test]
    async fn test_import_tree() {
        let dir = tempfile::tempdir().unwrap();
        GitOpsPlugin::new(Arc::new(store_with(&["a", "b"])))
            .export(&export_config(dir.path(), ConfigMap::new()))
            .await
            .unwrap();

        let target = Arc::new(store_with(&["a"]));
        let plugin = GitOpsPlugin::new(target.clone());

        let dry = plugin
            .import(&import_config(
                dir.path(),
                ExecutionOptions {
                    dry_run: true,
                    ..ExecutionOptions::default()
                },
            ))
            .await
            .unwrap();
        assert_eq!(dry.changes.len(), 1);
        assert_eq!(target.list_devices().unwrap().len(), 1);

        let applied = plugin
            .import(&import_config(dir.path(), ExecutionOptions::default()))
            .await
            .unwrap();
        assert!(applied.applied);
        assert_eq!(applied.changes, dry.changes);
        assert_eq!(target.list_devices().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_rejects_inline_source() {
        let plugin = GitOpsPlugin::new(Arc::new(store_with(&[])));
        let mut config = import_config(Path::new("/tmp"), ExecutionOptions::default());
        config.source.kind = "inline".to_string();
        let err = plugin.import(&config).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
