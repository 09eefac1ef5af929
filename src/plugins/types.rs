//! Plugin-facing request and response types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Generic key/value container for plugin config and filters
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Execution switches shared by export and import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Validate the request and report counts, nothing else
    #[serde(default)]
    pub validate_only: bool,

    /// Compute the full outcome without writing or mutating anything
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionOptions {
    /// True when the execution must not have side effects
    #[must_use]
    pub const fn is_side_effect_free(&self) -> bool {
        self.validate_only || self.dry_run
    }
}

/// Shape of an export destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    File,
    Directory,
}

/// Where an export should land
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub kind: OutputKind,

    /// Target path; the engine fills in a default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Where an import reads from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source type understood by the plugin (e.g. "file", "directory", "inline")
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Path for file/directory sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Raw payload for inline sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Validated export request as seen by a plugin
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Correlation id of this execution
    pub execution_id: String,
    pub format: String,
    pub config: ConfigMap,
    pub filters: ConfigMap,
    /// Output with the destination resolved
    pub output: OutputSpec,
    pub options: ExecutionOptions,
}

impl ExportConfig {
    /// Resolved destination path
    #[must_use]
    pub fn destination(&self) -> Option<PathBuf> {
        self.output.destination.as_ref().map(PathBuf::from)
    }
}

/// What a plugin produced on export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOutput {
    pub record_count: u64,
    /// Written file or directory; `None` when nothing was written
    pub output_path: Option<PathBuf>,
    pub size_bytes: u64,
    pub checksum: Option<String>,
}

/// Validated import request as seen by a plugin
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Correlation id of this execution
    pub execution_id: String,
    pub format: String,
    pub config: ConfigMap,
    pub source: SourceSpec,
    pub options: ExecutionOptions,
}

/// Kind of change an import makes to one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// A single planned or applied import change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub change_type: ChangeType,

    /// Identity of the affected record
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

/// What a plugin did (or would do) on import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutput {
    pub records_processed: u64,
    /// Changes ordered deterministically by target
    pub changes: Vec<Change>,
    /// Whether the changes were written to backing state
    pub applied: bool,
}

impl ImportOutput {
    /// Number of changes of one type
    #[must_use]
    pub fn count(&self, change_type: ChangeType) -> u64 {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count() as u64
    }
}

/// What an export would produce
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewOutput {
    pub record_count: u64,
    pub estimated_size: u64,
    /// A few record identities from the selection
    #[serde(default)]
    pub sample: Vec<String>,
}
