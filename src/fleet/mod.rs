//! Fleet inventory model consumed by sync plugins
//!
//! The inventory itself (CRUD, discovery) lives outside the sync engine; this
//! module only defines the shape plugins read and write through [`FleetStore`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Result;

/// A managed device and its desired configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Hardware model
    #[serde(default)]
    pub model: String,

    /// Firmware version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,

    /// Free-form labels used for grouping and filtering
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Typed device configuration (opaque to the engine)
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Backing store for fleet state
///
/// Implementations must be safe to share between request handlers.
pub trait FleetStore: Send + Sync {
    /// List all devices ordered by id
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn list_devices(&self) -> Result<Vec<Device>>;

    /// Get a device by id
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn get_device(&self, id: &str) -> Result<Option<Device>>;

    /// Insert or replace a device
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn upsert_device(&self, device: &Device) -> Result<()>;

    /// Delete a device, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn delete_device(&self, id: &str) -> Result<bool>;
}

/// Device selection decoded from a request's `filters` map
///
/// Every populated criterion must match; an empty filter selects all devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceFilter {
    #[serde(default)]
    pub device_ids: Vec<String>,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl DeviceFilter {
    /// Check whether a device satisfies the filter
    #[must_use]
    pub fn matches(&self, device: &Device) -> bool {
        if !self.device_ids.is_empty() && !self.device_ids.contains(&device.id) {
            return false;
        }
        if !self.models.is_empty() && !self.models.contains(&device.model) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| device.labels.get(k) == Some(v))
    }

    /// Apply the filter to a device list, preserving order
    #[must_use]
    pub fn apply(&self, devices: Vec<Device>) -> Vec<Device> {
        devices.into_iter().filter(|d| self.matches(d)).collect()
    }
}
