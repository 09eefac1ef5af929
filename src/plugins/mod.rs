//! Sync plugin system
//!
//! A plugin is a capability provider that knows how to export fleet state to
//! one family of external formats and import it back. The engine treats the
//! encoding as opaque: it validates requests against the plugin's declared
//! formats and config schema, then hands over a [`ExportConfig`] or
//! [`ImportConfig`] and records whatever comes back.
//!
//! # Example
//!
//! ```rust,ignore
//! use fleet_sync::plugins::PluginRegistry;
//!
//! let registry = PluginRegistry::new();
//! registry.register(Box::new(my_plugin)).await?;
//!
//! for info in registry.list().await {
//!     println!("{} v{} ({})", info.name, info.version, info.formats.join(", "));
//! }
//! ```

pub mod builtin;
pub mod registry;
pub mod schema;
pub mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use registry::{PluginDescriptor, PluginRegistry};
pub use schema::{ConfigField, ConfigSchema, FieldKind, decode_config};
pub use types::{
    Change, ChangeType, ConfigMap, ExecutionOptions, ExportConfig, ExportOutput, ImportConfig,
    ImportOutput, OutputKind, OutputSpec, PreviewOutput, SourceSpec,
};

/// Immutable plugin descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique registry key
    pub name: String,

    /// Plugin version (semver recommended)
    pub version: String,

    /// Short human-readable description
    #[serde(default)]
    pub description: String,

    /// Formats accepted by export/import (e.g. "json", "yaml")
    pub formats: Vec<String>,
}

impl PluginInfo {
    /// Check whether the plugin declares a format
    #[must_use]
    pub fn supports_format(&self, format: &str) -> bool {
        self.declared_format(format).is_some()
    }

    /// The plugin's own spelling of a format, matched case-insensitively
    #[must_use]
    pub fn declared_format(&self, format: &str) -> Option<&str> {
        let format = format.trim();
        self.formats
            .iter()
            .find(|f| f.eq_ignore_ascii_case(format))
            .map(String::as_str)
    }
}

/// Operations a plugin supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    pub export: bool,
    pub import: bool,
    pub preview: bool,
    /// Honors `dry_run`/`validate_only` without side effects
    pub dry_run: bool,
}

/// Context handed to a plugin when it is initialized
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Span scoped to the plugin; log through it
    pub span: tracing::Span,
}

impl PluginContext {
    #[must_use]
    pub fn for_plugin(name: &str) -> Self {
        Self {
            span: tracing::info_span!("plugin", plugin = %name),
        }
    }
}

/// Export/import capability provider
///
/// Implementations are operator-installed and trusted to honor the dry-run
/// contract: `dry_run` and `validate_only` must not mutate backing state or
/// write output.
#[async_trait]
pub trait SyncPlugin: Send + Sync {
    /// Plugin descriptor
    fn info(&self) -> PluginInfo;

    /// Supported operations
    fn capabilities(&self) -> PluginCapabilities;

    /// Schema for the free-form `config` map
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    /// Shape of export output when the caller names no destination
    fn output_kind(&self) -> OutputKind {
        OutputKind::File
    }

    /// Validate a request's `config` map
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the config is rejected
    fn validate_config(&self, config: &ConfigMap) -> Result<()> {
        self.config_schema().validate(config)
    }

    /// One-time setup, called by the registry before first use
    ///
    /// # Errors
    ///
    /// Returns error if the plugin cannot be used
    async fn initialize(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Serialize fleet state to the requested destination
    ///
    /// # Errors
    ///
    /// Returns error if the export fails
    async fn export(&self, config: &ExportConfig) -> Result<ExportOutput>;

    /// Reconstruct fleet state from a source
    ///
    /// # Errors
    ///
    /// Returns error if the import fails
    async fn import(&self, config: &ImportConfig) -> Result<ImportOutput>;

    /// Report what an export would produce without producing it
    ///
    /// # Errors
    ///
    /// Returns error if the preview cannot be computed
    async fn preview(&self, config: &ExportConfig) -> Result<PreviewOutput>;

    /// Release resources, called once at shutdown
    ///
    /// # Errors
    ///
    /// Returns error if cleanup fails
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_format_case_insensitive() {
        let info = PluginInfo {
            name: "archive".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            formats: vec!["json".to_string(), "yaml".to_string()],
        };
        assert!(info.supports_format("JSON"));
        assert!(!info.supports_format("xml"));
        assert_eq!(info.declared_format("YAML"), Some("yaml"));
        assert_eq!(info.declared_format(" Json "), Some("json"));
        assert_eq!(info.declared_format("xml"), None);
    }
}
