//! Engine-facing requests and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{HistoryEntry, SyncDirection};
use crate::plugins::{Change, ConfigMap, ExecutionOptions, OutputSpec, PreviewOutput, SourceSpec};

/// Export request as received from a caller or synthesized by a schedule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub filters: ConfigMap,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub options: ExecutionOptions,
}

/// Import request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub options: ExecutionOptions,
}

/// Outcome of one export execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    #[serde(rename = "export_id")]
    pub id: String,
    pub success: bool,
    pub plugin_name: String,
    pub format: String,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub dry_run: bool,
    pub validate_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExportResult {
    /// Flatten into an audit entry
    #[must_use]
    pub fn to_history(&self, requester: &str) -> HistoryEntry {
        HistoryEntry {
            direction: SyncDirection::Export,
            correlation_id: self.id.clone(),
            plugin_name: self.plugin_name.clone(),
            format: self.format.clone(),
            success: self.success,
            dry_run: self.dry_run || self.validate_only,
            record_count: self.record_count,
            created_count: 0,
            updated_count: 0,
            deleted_count: 0,
            output_path: self.output_path.clone(),
            error: self.error.clone(),
            requester: requester.to_string(),
            duration_ms: self.duration_ms,
            created_at: self.completed_at,
        }
    }
}

/// Outcome of one import execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    #[serde(rename = "import_id")]
    pub id: String,
    pub success: bool,
    pub plugin_name: String,
    pub format: String,
    pub records_processed: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    #[serde(default)]
    pub changes: Vec<Change>,
    /// Whether changes were written to backing state
    pub applied: bool,
    pub dry_run: bool,
    pub validate_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ImportResult {
    /// Flatten into an audit entry
    #[must_use]
    pub fn to_history(&self, requester: &str) -> HistoryEntry {
        HistoryEntry {
            direction: SyncDirection::Import,
            correlation_id: self.id.clone(),
            plugin_name: self.plugin_name.clone(),
            format: self.format.clone(),
            success: self.success,
            dry_run: self.dry_run || self.validate_only,
            record_count: self.records_processed,
            created_count: self.created,
            updated_count: self.updated,
            deleted_count: self.deleted,
            output_path: None,
            error: self.error.clone(),
            requester: requester.to_string(),
            duration_ms: self.duration_ms,
            created_at: self.completed_at,
        }
    }
}

/// Side-effect-free estimate of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub plugin_name: String,
    pub format: String,
    #[serde(flatten)]
    pub preview: PreviewOutput,
}

/// Outcome of a validation-only check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_request_from_wire() {
        let req: ExportRequest = serde_json::from_str(
            r#"{"plugin_name":"mockfile","format":"txt","output":{"type":"file","destination":"/tmp/x.txt"}}"#,
        )
        .unwrap();
        assert_eq!(req.plugin_name, "mockfile");
        assert_eq!(req.output.destination.as_deref(), Some("/tmp/x.txt"));
        assert!(!req.options.dry_run);
        assert!(req.config.is_empty());
    }

    #[test]
    fn test_export_result_uses_export_id() {
        let now = Utc::now();
        let result = ExportResult {
            id: "abc".to_string(),
            success: true,
            plugin_name: "p".to_string(),
            format: "json".to_string(),
            record_count: 1,
            output_path: None,
            size_bytes: 0,
            checksum: None,
            dry_run: false,
            validate_only: false,
            error: None,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["export_id"], "abc");
        assert!(json.get("output_path").is_none());

        let entry = result.to_history("alice");
        assert_eq!(entry.correlation_id, "abc");
        assert_eq!(entry.requester, "alice");
        assert_eq!(entry.direction, SyncDirection::Export);
    }

    fn import_result(dry_run: bool, success: bool, applied: bool) -> ImportResult {
        let now = Utc::now();
        ImportResult {
            id: "imp-1".to_string(),
            success,
            plugin_name: "archive".to_string(),
            format: "json".to_string(),
            records_processed: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            changes: Vec::new(),
            applied,
            dry_run,
            validate_only: false,
            error: (!success).then(|| "bad archive".to_string()),
            started_at: now,
            completed_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_failed_real_import_not_audited_as_dry_run() {
        let entry = import_result(false, false, false).to_history("alice");
        assert_eq!(entry.direction, SyncDirection::Import);
        assert!(!entry.success);
        assert!(!entry.dry_run);

        assert!(import_result(true, true, false).to_history("alice").dry_run);
        assert!(!import_result(false, true, true).to_history("alice").dry_run);
    }
}
