//! Built-in sync plugins
//!
//! - `archive`: single-document JSON/YAML backups with a content checksum
//! - `gitops`: declarative YAML tree, one file per device

mod archive;
mod gitops;

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

pub use archive::ArchivePlugin;
pub use gitops::GitOpsPlugin;

use super::{Change, ChangeType, ConfigMap, PluginRegistry, SourceSpec};
use crate::fleet::{Device, DeviceFilter, FleetStore};
use crate::{Error, Result};

/// Number of record identities returned by previews
const PREVIEW_SAMPLE: usize = 5;

/// Register every built-in plugin against a fleet store
///
/// # Errors
///
/// Returns error if a built-in fails to register
pub async fn register_builtin(registry: &PluginRegistry, store: Arc<dyn FleetStore>) -> Result<()> {
    registry
        .register(Box::new(ArchivePlugin::new(Arc::clone(&store))))
        .await?;
    registry.register(Box::new(GitOpsPlugin::new(store))).await?;
    Ok(())
}

/// Load the devices selected by a request's filters
fn select_devices(store: &dyn FleetStore, filters: &ConfigMap) -> Result<Vec<Device>> {
    let filter: DeviceFilter = if filters.is_empty() {
        DeviceFilter::default()
    } else {
        serde_json::from_value(serde_json::Value::Object(filters.clone()))
            .map_err(|e| Error::Validation(format!("invalid filters: {e}")))?
    };
    Ok(filter.apply(store.list_devices()?))
}

/// Hex SHA-256 over the canonical JSON encoding of a device list
fn checksum(devices: &[Device]) -> Result<String> {
    let canonical = serde_json::to_vec(devices)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

fn sample(devices: &[Device]) -> Vec<String> {
    devices
        .iter()
        .take(PREVIEW_SAMPLE)
        .map(|d| d.id.clone())
        .collect()
}

/// Read the payload of a file or inline source
async fn read_source(source: &SourceSpec) -> Result<String> {
    match source.kind.as_str() {
        "inline" => source
            .data
            .clone()
            .ok_or_else(|| Error::Validation("inline source requires 'data'".to_string())),
        "file" => {
            let location = source
                .location
                .as_deref()
                .ok_or_else(|| Error::Validation("file source requires 'location'".to_string()))?;
            Ok(tokio::fs::read_to_string(location).await?)
        }
        other => Err(Error::Validation(format!("unsupported source type '{other}'"))),
    }
}

/// Diff desired devices against current state
///
/// Output is ordered by device id so identical inputs always yield the same
/// plan. Devices missing from `desired` are deleted only when `prune` is set.
fn plan_changes(current: Vec<Device>, desired: Vec<Device>, prune: bool) -> Result<Vec<Change>> {
    let mut current: BTreeMap<String, Device> =
        current.into_iter().map(|d| (d.id.clone(), d)).collect();
    let desired: BTreeMap<String, Device> =
        desired.into_iter().map(|d| (d.id.clone(), d)).collect();

    let mut changes = Vec::new();
    for (id, want) in &desired {
        match current.remove(id) {
            None => changes.push(Change {
                change_type: ChangeType::Create,
                target: id.clone(),
                before: None,
                after: Some(serde_json::to_value(want)?),
            }),
            Some(have) if &have != want => changes.push(Change {
                change_type: ChangeType::Update,
                target: id.clone(),
                before: Some(serde_json::to_value(&have)?),
                after: Some(serde_json::to_value(want)?),
            }),
            Some(_) => {}
        }
    }

    if prune {
        for (id, have) in current {
            changes.push(Change {
                change_type: ChangeType::Delete,
                target: id,
                before: Some(serde_json::to_value(&have)?),
                after: None,
            });
        }
        changes.sort_by(|a, b| a.target.cmp(&b.target));
    }

    Ok(changes)
}

/// Write a change plan to the store
fn apply_changes(store: &dyn FleetStore, changes: &[Change]) -> Result<()> {
    for change in changes {
        match change.change_type {
            ChangeType::Create | ChangeType::Update => {
                let after = change.after.clone().ok_or_else(|| {
                    Error::PluginExecution(format!("change for '{}' has no payload", change.target))
                })?;
                let device: Device = serde_json::from_value(after)?;
                store.upsert_device(&device)?;
            }
            ChangeType::Delete => {
                store.delete_device(&change.target)?;
            }
        }
    }
    Ok(())
}
